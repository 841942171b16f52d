use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use drone_catalog::catalog::Catalog;
use drone_catalog::collection::ImageCollection;
use drone_catalog::config::AppConfig;
use drone_catalog::geo::{geo_buckets, GeoGridRequest};
use drone_catalog::grid::LocalDiskConnector;
use drone_catalog::metadata::{GeoPoint, ImageMetadata};
use drone_catalog::query::{DistanceUnits, NumericOperator, QueryCondition};
use drone_catalog::search::SearchIndex;
use drone_catalog::search_clients::elasticsearch::ElasticSearchIndex;
use drone_catalog::session::{SessionPool, WorkerId};
use drone_catalog::tasks::{CancellationFlag, ProgressSink, TaskExecutor};
use drone_catalog::upload::{UploadJob, UploadPipeline};

#[derive(Parser)]
#[command(name = "drone_catalog", about = "Geotagged imagery catalog tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the backend indices.
    InitIndices {
        /// Drop and recreate indices that already exist. Destroys all data.
        #[arg(long)]
        drop: bool,
    },
    /// Upload a directory of imagery to a collection.
    Upload {
        collection_id: String,
        directory: PathBuf,
        #[arg(long)]
        user: String,
    },
    /// Query the metadata index with simple filters.
    Query {
        #[arg(long)]
        collection: Vec<String>,
        #[arg(long)]
        site: Vec<String>,
        #[arg(long)]
        file_type: Vec<String>,
        #[arg(long)]
        min_altitude: Option<String>,
    },
    /// Aggregate indexed images into map buckets over a bounding box.
    MapBuckets {
        north: f64,
        west: f64,
        south: f64,
        east: f64,
        #[arg(long, default_value_t = 5)]
        precision: u8,
        #[arg(long, default_value_t = 10)]
        samples: usize,
    },
    /// Detect which site each lat,lon position falls inside.
    DetectSites {
        /// Positions as lat,lon pairs.
        positions: Vec<String>,
    },
}

fn parse_position(text: &str) -> Result<GeoPoint> {
    let (lat, lon) = text
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("position '{}' is not lat,lon", text))?;
    Ok(GeoPoint::new(lat.trim().parse()?, lon.trim().parse()?))
}

async fn find_collection(catalog: &Catalog, id: &str) -> Result<ImageCollection> {
    catalog
        .all_collections()
        .await?
        .into_iter()
        .find(|c| c.id == id)
        .ok_or_else(|| anyhow::anyhow!("no collection with id '{}'", id))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::new()?;

    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting drone_catalog");

    let search: Arc<dyn SearchIndex> = Arc::new(ElasticSearchIndex::new(&config)?);
    let catalog = Catalog::new(search.clone(), config.scroll_page_size);

    let cli = Cli::parse();
    match cli.command {
        Command::InitIndices { drop } => {
            catalog.init_indices(&config, drop).await?;
            info!("Indices ready.");
        }
        Command::Upload {
            collection_id,
            directory,
            user,
        } => {
            let collection = find_collection(&catalog, &collection_id).await?;
            let connector = Arc::new(LocalDiskConnector::new(&config.grid_local_root));
            let pool = Arc::new(SessionPool::new(connector));
            let pipeline = Arc::new(UploadPipeline::new(
                pool,
                search.clone(),
                tokio::runtime::Handle::current(),
                config.grid_base_path.clone(),
            ));
            let job = UploadJob {
                collection,
                source_root: directory,
                uploading_user: user,
                max_per_archive: config.max_files_per_archive,
                storage_method: "Local Disk Grid".into(),
                // The CLI has no metadata extractor attached; index neutral
                // records stamped with the current time.
                metadata: Arc::new(|_path| {
                    ImageMetadata::new(chrono::Utc::now(), GeoPoint::new(0.0, 0.0))
                }),
            };

            let (sender, receiver) = crossbeam_channel::unbounded();
            let progress = ProgressSink::new(sender);
            let cancel = CancellationFlag::new();
            let printer = std::thread::spawn(move || {
                for event in receiver.iter() {
                    println!("[{:>5.1}%] {}", event.fraction * 100.0, event.message);
                }
            });

            let executor = TaskExecutor::new(config.background_workers, config.immediate_task_cap);
            let (done_sender, done_receiver) = crossbeam_channel::bounded(1);
            executor.background.submit(move |worker: WorkerId| {
                let result = pipeline.run(worker, &job, &progress, &cancel);
                let _ = done_sender.send(result);
            })?;
            let outcome = done_receiver.recv()??;
            executor.background.shutdown();
            let _ = printer.join();
            println!(
                "Uploaded {} files in {} archive(s) to {}",
                outcome.file_count, outcome.archive_count, outcome.record.upload_path
            );
        }
        Command::Query {
            collection,
            site,
            file_type,
            min_altitude,
        } => {
            let mut conditions = vec![
                QueryCondition::CollectionSet(collection.into_iter().collect()),
                QueryCondition::SiteSet(site.into_iter().collect()),
                QueryCondition::FileTypeSet(file_type.into_iter().collect()),
            ];
            if let Some(text) = min_altitude {
                conditions.push(QueryCondition::altitude_from_input(
                    &text,
                    DistanceUnits::Meters,
                    NumericOperator::GreaterThanOrEqual,
                ));
            }
            let images = catalog.query_images(&conditions).await?;
            println!("{} matching images", images.len());
            for image in images {
                println!(
                    "{}\t{}\t{:.5},{:.5}",
                    image.storage_path,
                    image.image_metadata.date_taken,
                    image.image_metadata.position.lat,
                    image.image_metadata.position.lon,
                );
            }
        }
        Command::MapBuckets {
            north,
            west,
            south,
            east,
            precision,
            samples,
        } => {
            let mut request = GeoGridRequest::bounded(
                GeoPoint::new(north.clamp(-90.0, 90.0), west.clamp(-180.0, 180.0)),
                GeoPoint::new(south.clamp(-90.0, 90.0), east.clamp(-180.0, 180.0)),
                precision,
            );
            request.ids_per_bucket = samples;
            let buckets = geo_buckets(search.as_ref(), &request).await?;
            for bucket in buckets {
                println!(
                    "{:.5},{:.5}\t{} images\tsample: {}",
                    bucket.center_latitude,
                    bucket.center_longitude,
                    bucket.document_count,
                    bucket.sample_ids.join(",")
                );
            }
        }
        Command::DetectSites { positions } => {
            let parsed = positions
                .iter()
                .map(|text| parse_position(text))
                .collect::<Result<Vec<_>>>()?;
            let detected = catalog.detect_sites(&parsed).await?;
            for (position, code) in parsed.iter().zip(detected) {
                println!(
                    "{:.5},{:.5}\t{}",
                    position.lat,
                    position.lon,
                    code.unwrap_or_else(|| "-".into())
                );
            }
        }
    }

    info!("drone_catalog finished");
    Ok(())
}
