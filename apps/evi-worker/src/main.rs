use clap::Parser;

use evi_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	evi_worker::run(args).await
}
