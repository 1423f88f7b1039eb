use super::messages::{NatsSubjects, StatusNotice};
use crate::audio::{AudioLevelSample, LevelBus};
use crate::command::{decode_payload, Command, CommandChannel, CommandStream};
use crate::status::{ChangeStream, SessionStatus, StatusStore, StatusUpdate};
use anyhow::{anyhow, Context, Result};
use async_nats::jetstream::{self, consumer, kv, stream};
use async_nats::Client;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// NATS-backed command channel, status store and level bus
///
/// - live commands: core pub/sub on `subjects.commands`
/// - legacy queue: JetStream work-queue stream drained by a durable pull consumer
/// - status: one JSON record in a JetStream KV bucket, plus a notification
///   subject fired after each write
/// - levels: core pub/sub, fire-and-forget
pub struct NatsClient {
    client: Client,
    jetstream: jetstream::Context,
    subjects: NatsSubjects,
    status_kv: kv::Store,
    queue: consumer::Consumer<consumer::pull::Config>,
    /// Last status this process wrote; writes merge into it
    cache: Mutex<Option<SessionStatus>>,
}

impl NatsClient {
    /// Connect to NATS and make sure the KV bucket and queue stream exist
    pub async fn connect(url: &str, subjects: NatsSubjects) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;
        let jetstream = jetstream::new(client.clone());

        let status_kv = match jetstream.get_key_value(subjects.status_bucket.clone()).await {
            Ok(store) => store,
            Err(_) => jetstream
                .create_key_value(kv::Config {
                    bucket: subjects.status_bucket.clone(),
                    history: 1,
                    ..Default::default()
                })
                .await
                .context("Failed to create status bucket")?,
        };

        let queue_stream = jetstream
            .get_or_create_stream(stream::Config {
                name: subjects.queue_stream.clone(),
                subjects: vec![subjects.queue_subject.clone()],
                retention: stream::RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .context("Failed to open command queue stream")?;

        let queue = queue_stream
            .get_or_create_consumer(
                &subjects.queue_consumer,
                consumer::pull::Config {
                    durable_name: Some(subjects.queue_consumer.clone()),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to open command queue consumer")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            jetstream,
            subjects,
            status_kv,
            queue,
            cache: Mutex::new(None),
        })
    }

    async fn fetch_status(&self) -> Result<Option<SessionStatus>> {
        let stored = self
            .status_kv
            .get(self.subjects.status_key.clone())
            .await
            .context("Failed to read status")?;

        match stored {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("Malformed status record")?,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CommandChannel for NatsClient {
    async fn publish(&self, command: &Command) -> Result<()> {
        let payload = command.encode()?;
        self.client
            .publish(self.subjects.commands.clone(), payload.into())
            .await
            .context("Failed to publish command")?;
        debug!("Published {:?} to {}", command.action, self.subjects.commands);
        Ok(())
    }

    async fn enqueue(&self, command: &Command) -> Result<()> {
        let payload = command.encode()?;
        self.jetstream
            .publish(self.subjects.queue_subject.clone(), payload.into())
            .await
            .context("Failed to enqueue command")?
            .await
            .context("Command queue did not acknowledge")?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<CommandStream> {
        let subscriber = self
            .client
            .subscribe(self.subjects.commands.clone())
            .await
            .context("Failed to subscribe to commands")?;

        info!("Subscribed to {}", self.subjects.commands);

        let commands = subscriber
            .filter_map(|message| async move { decode_payload(&message.payload, "live subject") });
        Ok(commands.boxed())
    }

    async fn pop_queued(&self, timeout: Duration) -> Result<Option<Command>> {
        let mut batch = self
            .queue
            .fetch()
            .max_messages(1)
            .expires(timeout)
            .messages()
            .await
            .context("Failed to fetch from command queue")?;

        match batch.next().await {
            Some(Ok(message)) => {
                message
                    .ack()
                    .await
                    .map_err(|e| anyhow!("Failed to ack queued command: {}", e))?;
                Ok(decode_payload(&message.payload, "legacy queue"))
            }
            Some(Err(e)) => Err(anyhow!("Command queue fetch failed: {}", e)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StatusStore for NatsClient {
    async fn write(&self, update: StatusUpdate) -> Result<SessionStatus> {
        // Held across the put so writes from this process land in order
        let mut cache = self.cache.lock().await;

        let mut status = match cache.take() {
            Some(status) => status,
            None => match self.fetch_status().await {
                Ok(stored) => stored.unwrap_or_default(),
                Err(e) => {
                    warn!("Starting from empty status: {:#}", e);
                    SessionStatus::default()
                }
            },
        };
        status.apply(update, Utc::now());
        *cache = Some(status.clone());

        let payload = serde_json::to_vec(&status)?;
        self.status_kv
            .put(self.subjects.status_key.clone(), payload.into())
            .await
            .context("Failed to write status")?;

        let notice = serde_json::to_vec(&StatusNotice::from(&status))?;
        if let Err(e) = self
            .client
            .publish(self.subjects.status_notify.clone(), notice.into())
            .await
        {
            debug!("Status notification not sent: {}", e);
        }

        Ok(status)
    }

    async fn read(&self) -> Result<SessionStatus> {
        Ok(self.fetch_status().await?.unwrap_or_default())
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream> {
        let subscriber = self
            .client
            .subscribe(self.subjects.status_notify.clone())
            .await
            .context("Failed to subscribe to status updates")?;
        Ok(subscriber.map(|_| ()).boxed())
    }
}

#[async_trait]
impl LevelBus for NatsClient {
    async fn publish_level(&self, sample: &AudioLevelSample) -> Result<()> {
        let payload = serde_json::to_vec(sample)?;
        self.client
            .publish(self.subjects.levels.clone(), payload.into())
            .await
            .context("Failed to publish audio level")?;
        Ok(())
    }

    async fn subscribe_levels(&self) -> Result<BoxStream<'static, AudioLevelSample>> {
        let subscriber = self
            .client
            .subscribe(self.subjects.levels.clone())
            .await
            .context("Failed to subscribe to audio levels")?;

        let samples = subscriber.filter_map(|message| async move {
            serde_json::from_slice::<AudioLevelSample>(&message.payload).ok()
        });
        Ok(samples.boxed())
    }
}
