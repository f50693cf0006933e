//! RabbitMQ connections over lapin

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::Arc;

use super::{BrokerChannel, BrokerConnection, BrokerConnector, BrokerSettings, MessageStream};

const REPLY_SUCCESS: u16 = 200;

#[derive(Debug, Default, Clone, Copy)]
pub struct RabbitMqConnector;

#[async_trait]
impl BrokerConnector for RabbitMqConnector {
    async fn connect(&self, settings: &BrokerSettings) -> anyhow::Result<Arc<dyn BrokerConnection>> {
        let connection = Connection::connect(&settings.uri, ConnectionProperties::default()).await?;
        Ok(Arc::new(RabbitMqConnection { connection }))
    }
}

struct RabbitMqConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for RabbitMqConnection {
    async fn open_channel(&self) -> anyhow::Result<Box<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await?;
        Ok(Box::new(RabbitMqChannel { channel }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.connection.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }
}

struct RabbitMqChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for RabbitMqChannel {
    async fn declare_queue(&mut self, queue: &str) -> anyhow::Result<()> {
        let options = QueueDeclareOptions {
            durable: false,
            auto_delete: true,
            ..Default::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn publish(&mut self, queue: &str, body: &[u8]) -> anyhow::Result<()> {
        let properties = BasicProperties::default().with_content_type("text/plain".into());
        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), body, properties)
            .await?
            .await?;
        Ok(())
    }

    async fn consume(&mut self, queue: &str) -> anyhow::Result<Box<dyn MessageStream>> {
        let options = BasicConsumeOptions {
            no_ack: true,
            ..Default::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, "", options, FieldTable::default())
            .await?;
        Ok(Box::new(RabbitMqStream { consumer }))
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.channel.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }
}

struct RabbitMqStream {
    consumer: Consumer,
}

#[async_trait]
impl MessageStream for RabbitMqStream {
    async fn next_message(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        match self.consumer.next().await {
            Some(delivery) => Ok(Some(delivery?.data)),
            None => Ok(None),
        }
    }
}
