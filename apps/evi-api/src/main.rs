use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = evi_api::Args::parse();

	evi_api::run(args).await
}
