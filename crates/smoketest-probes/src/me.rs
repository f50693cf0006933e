//! Self probe: the app is up and serving

use async_trait::async_trait;
use smoketest_core::{Probe, TestResult};

pub const KEY: &str = "me";

/// Always passes; its name identifies the site being tested
pub struct MeProbe {
    name: String,
}

impl MeProbe {
    /// Name is `"<type>\n[<site>]"` when both are set, `"Me"` otherwise
    pub fn new(site_type: Option<&str>, site_name: Option<&str>) -> Self {
        let name = match (site_type, site_name) {
            (Some(t), Some(s)) if !t.is_empty() && !s.is_empty() => format!("{}\n[{}]", t, s),
            _ => "Me".to_string(),
        };
        Self { name }
    }
}

#[async_trait]
impl Probe for MeProbe {
    fn key(&self) -> &str {
        KEY
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> TestResult {
        TestResult::passed(self.name.clone()).with_key(KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_me_passes() {
        let result = MeProbe::new(None, None).run().await;
        assert!(result.is_passed());
        assert_eq!(result.key(), Some("me"));
        assert_eq!(result.name(), "Me");
    }

    #[test]
    fn test_name_includes_site() {
        assert_eq!(MeProbe::new(Some("Production"), Some("dc1")).name(), "Production\n[dc1]");
        assert_eq!(MeProbe::new(Some("Production"), None).name(), "Me");
        assert_eq!(MeProbe::new(Some(""), Some("dc1")).name(), "Me");
    }
}
