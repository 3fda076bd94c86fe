use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

pub fn create_spinner(message: String) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();

    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")?.tick_strings(&[
            "▹▹▹▹▹",
            "▸▹▹▹▹",
            "▹▸▹▹▹",
            "▹▹▸▹▹",
            "▹▹▹▸▹",
            "▹▹▹▹▸",
            "▪▪▪▪▪",
        ]),
    );

    Ok(pb)
}

pub fn create_progress_bar(total_size: u64, message: String) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(total_size);

    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(40));
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    Ok(pb)
}

/// Advances `pb` by every byte count received until all senders are dropped.
/// Archive overhead can push the count past the total, so it is clamped.
pub fn track_progress(pb: ProgressBar, mut receiver: UnboundedReceiver<u64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let total = pb.length().unwrap_or(u64::MAX);

        while let Some(bytes) = receiver.recv().await {
            pb.set_position((pb.position() + bytes).min(total));
        }
    })
}
