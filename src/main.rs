use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raq_crawler::config::{CrawlerConfig, DEFAULT_STAGE};
use raq_crawler::github::{ApiSession, SessionConfig, install_crypto_provider};
use raq_crawler::queue::{MessageQueueClient, SqsQueue};
use raq_crawler::results::{DirectoryUploader, FtpSettings, FtpUploader, Uploader};
use raq_crawler::worker::{DispatchConfig, Dispatcher, ScratchSpace, WorkerContext};

/// Crawls GitHub repositories listed on a work queue.
#[derive(Debug, Parser)]
#[command(name = "raq-crawler", version)]
struct Args {
    /// Configuration stage; selects the RAQ_CRAWLER_<STAGE>_* variables.
    #[arg(default_value = DEFAULT_STAGE)]
    stage: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raq_crawler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    install_crypto_provider();

    let args = Args::parse();
    let config = CrawlerConfig::from_env(&args.stage);
    debug!(?config, "Loaded configuration");

    let context = WorkerContext::new(config.stage());
    info!(
        worker_id = %context.worker_id(),
        stage = context.stage(),
        "Starting worker"
    );

    let session = ApiSession::new(SessionConfig::from_config(&config)?)?;
    if !session.is_authenticated() {
        warn!("No github_token configured, using the anonymous quota");
    }

    let backend = SqsQueue::connect(
        config.queue_address()?,
        config.region(),
        config.aws_credentials(),
    )
    .await;
    let queue = MessageQueueClient::new(backend)
        .with_wait_time(config.queue_wait()?)
        .with_visibility_timeout(config.visibility_timeout()?);
    let ftp = FtpSettings::from_config(&config)?;
    let scratch =
        ScratchSpace::create(context.worker_id()).context("failed to create scratch space")?;
    let dispatch_config = DispatchConfig::from_config(&config)?;

    let interrupt = context.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current message");
            interrupt.stop();
        }
    });

    let parts = Parts {
        session,
        queue,
        context,
        scratch,
        config: dispatch_config,
    };
    match ftp {
        Some(settings) => {
            info!(?settings, "Uploading results over FTPS");
            parts.run(FtpUploader::new(settings)).await
        }
        None => {
            let uploader = DirectoryUploader::new(config.upload_dir()?, config.upload_prefix());
            parts.run(uploader).await
        }
    }
}

/// Everything the dispatcher needs apart from the uploader.
struct Parts {
    session: ApiSession,
    queue: MessageQueueClient<SqsQueue>,
    context: WorkerContext,
    scratch: ScratchSpace,
    config: DispatchConfig,
}

impl Parts {
    async fn run<U: Uploader>(self, uploader: U) -> anyhow::Result<()> {
        let mut dispatcher = Dispatcher::new(
            self.session,
            self.queue,
            uploader,
            self.context,
            self.scratch,
            self.config,
        );
        dispatcher.run().await?;
        Ok(())
    }
}
