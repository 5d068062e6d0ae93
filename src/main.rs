use anyhow::Result;
use character2sprites::core::catalog::TASK_COUNT;
use character2sprites::core::config::Config;
use character2sprites::core::io::{NativeStorage, Storage};
use character2sprites::core::state::Session;
use character2sprites::services::export::export_session;
use character2sprites::services::generation::create_generator;
use character2sprites::services::postprocess::ChromaKeyRemover;
use character2sprites::services::setup;
use character2sprites::services::workflow::GenerationWorkflow;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load Config
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid generation settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    // 2. Interactive Setup (API key, character attributes)
    let attributes = setup::run_setup(&mut config)?;

    // 3. Initialize generator and workflow
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let generator = create_generator(&config, storage.clone())?;
    let workflow = GenerationWorkflow::new(
        generator,
        Arc::new(ChromaKeyRemover::new()),
        config.concurrency,
    );
    workflow.edit_attributes(attributes.clone())?;

    let pb = ProgressBar::new(TASK_COUNT as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let progress = spawn_progress(workflow.subscribe(), pb.clone());

    // 4. Generate
    println!("Generating reference sheet...");
    let mut session = workflow.start(attributes).await?;

    while !config.unattended && !session.failed_keys().is_empty() {
        let failed = session.failed_keys();
        pb.suspend(|| {
            println!("{} parts failed:", failed.len());
            for key in &failed {
                let reason = session
                    .task(*key)
                    .and_then(|t| t.error_message.as_deref())
                    .unwrap_or("unknown error");
                println!(
                    "  {} ({}): {}",
                    key.body_part.display_name(),
                    key.view_angle.display_name(),
                    reason
                );
            }
        });

        let retry = pb.suspend(|| {
            Confirm::new("Retry failed parts?")
                .with_default(true)
                .prompt()
        })?;
        if !retry {
            break;
        }

        for key in failed {
            workflow.retry_task(key).await?;
        }
        session = workflow.snapshot();
    }

    progress.abort();
    let summary = session.progress();
    pb.set_position(summary.settled() as u64);
    pb.finish_with_message(format!(
        "Generation complete ({} failed)",
        summary.failed
    ));

    // 5. Export
    let exported = export_session(
        &session,
        &config.export,
        storage.as_ref(),
        &config.output_folder,
    )
    .await?;
    println!(
        "Exported {} parts to {}",
        exported.parts_written, exported.folder
    );

    Ok(())
}

fn spawn_progress(mut rx: watch::Receiver<Arc<Session>>, pb: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let session = rx.borrow_and_update().clone();
            let progress = session.progress();
            pb.set_position(progress.settled() as u64);
            pb.set_message(format!(
                "{} ({} failed)",
                session.overall_status(),
                progress.failed
            ));
        }
    })
}
