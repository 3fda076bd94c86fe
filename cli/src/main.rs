mod library;

use library::commands::run;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run().await
}
