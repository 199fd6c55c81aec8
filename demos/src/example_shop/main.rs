use std::{error::Error, path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use shopcrawler::{
    events::{self, TracingListener},
    storage::JsonLinesSink,
    tester, Process, ProcessState, ReqwestClient, RequestPolicy,
};
use tokio::signal;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Crawls example.com with the example shop models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the example shop and store its items as JSON lines
    Crawl {
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Process timeout in seconds
        #[arg(short, long, default_value_t = 3600)]
        timeout: u64,
    },
    /// Fetch one URL and print what the start page model extracts from it
    TestUrl {
        #[arg(required = true)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("info"))
                .expect("telemetry: Creating EnvFilter"),
        )
        .init();
    tracing::info!("starting example-shop");

    let client = ReqwestClient::new()?;
    match Cli::parse().command {
        Command::Crawl {
            output_dir,
            timeout,
        } => {
            let (events, mut dispatcher) = events::channel();
            dispatcher
                .register(TracingListener)
                .register(JsonLinesSink::new(&output_dir)?);
            let dispatching = tokio::spawn(dispatcher.run());

            let config = example_shop::config()?;
            let state = ProcessState {
                scheduler_on: false,
                spiders_chosen: [config.name().to_owned()].into(),
                timeout: Duration::from_secs(timeout),
                ..ProcessState::default()
            };
            let process = Process::new(state, Arc::new(client), &events);
            let report = process.run(vec![config], signal::ctrl_c()).await;
            drop(process);
            drop(events);
            dispatching.await?;

            println!(
                "{} item(s) from {} spider(s) in {:?}, written to '{}'",
                report.items_extracted(),
                report.spiders.len(),
                report.elapsed,
                output_dir.display()
            );
            for error in &report.errors {
                eprintln!("error: {error}");
            }
        }
        Command::TestUrl { url } => {
            let model = example_shop::start_page()?;
            let report = tester::test_url(&client, &RequestPolicy::default(), &model, &url).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

pub mod example_shop {
    use std::{error::Error, sync::Arc};

    use shopcrawler::{
        error::SchemaError,
        page::clean,
        ConcurrencyPolicy, Field, Model, PageModel, SpiderConfig,
    };

    pub fn start_page() -> Result<Arc<PageModel>, SchemaError> {
        PageModel::builder("StartPage")
            .field(Field::css("title", "head title::text"))
            .field(Field::regex("charset", "charset=([a-z1-9-]+)"))
            .catalogue_links(
                Field::css("catalogue_pages", "div p a::attr(href)")
                    .many()
                    .clean(clean::absolute_urls),
            )
            .build()
    }

    pub fn more_link() -> Result<Arc<Model>, SchemaError> {
        Model::builder("ExampleMoreLink")
            .field(Field::css("title", "a::text"))
            .field(Field::css("url", "a::attr(href)").clean(clean::absolute_url))
            .build()
    }

    pub fn catalogue_page() -> Result<Arc<PageModel>, SchemaError> {
        PageModel::builder("CataloguePage")
            .items(Field::css("items", ".navigation a").many().model(more_link()?))
            .build()
    }

    pub fn config() -> Result<SpiderConfig, Box<dyn Error>> {
        let config = SpiderConfig::builder("example.com", "https://example.com")
            .allowed_domains(["example.com", "iana.org"])
            .start_model(start_page()?)
            .catalogue_model(catalogue_page()?)
            .concurrency(ConcurrencyPolicy {
                task_limit: 2,
                ..ConcurrencyPolicy::default()
            })
            .build()?;
        Ok(config)
    }
}
