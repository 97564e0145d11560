//! Example: query terrain height and surface uncertainty.
//!
//! Usage: cargo run --example query_height -- <lat> <lon> [elevation_dir_or_config.yaml]

use geoheight::{DatabaseRegistry, ElevationConfig, ElevationManager, GeoPoint, HeightReference};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    geoheight_metrics::describe_metrics();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <lat> <lon> [elevation_dir_or_config.yaml]", args[0]);
        eprintln!("Example: {} 47.6062 -122.3321 ./dem_data", args[0]);
        std::process::exit(1);
    }

    let lat: f64 = args[1].parse().expect("Invalid latitude");
    let lon: f64 = args[2].parse().expect("Invalid longitude");
    let source = args.get(3).map(String::as_str).unwrap_or("dem_data");

    let config = if Path::new(source).extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
        ElevationConfig::from_file(source).expect("Failed to load configuration")
    } else {
        ElevationConfig {
            search_paths: vec![source.into()],
            ..ElevationConfig::default()
        }
    };

    let start = Instant::now();
    let manager = Arc::new(ElevationManager::from_config(config));
    manager.initialize(&DatabaseRegistry::with_defaults());
    println!(
        "Loaded {} elevation database(s) in {:.3}s",
        manager.database_count(),
        start.elapsed().as_secs_f64()
    );

    let point = GeoPoint::new(lat, lon);
    let query_start = Instant::now();
    let hae = manager.height_above_ellipsoid(&point);
    println!(
        "Height above ellipsoid: {:.2} m ({:.3}s)",
        hae,
        query_start.elapsed().as_secs_f64()
    );

    // Second query hits the open cell
    let query_start = Instant::now();
    let msl = manager.height_above_msl(&point);
    println!(
        "Height above MSL: {:.2} m (cached: {:.6}s)",
        msl,
        query_start.elapsed().as_secs_f64()
    );

    match manager.accuracy_info(&point) {
        Some(info) => println!(
            "Accuracy: CE90 {:.1} m, LE90 {:.1} m ({})",
            info.absolute_ce90, info.absolute_le90, info.source
        ),
        None => println!("Accuracy: not reported, assuming CE90 20 m / LE90 16 m"),
    }

    let reference = HeightReference::Dem(Arc::clone(&manager));
    let normal = reference.local_terrain_normal(&point);
    println!("Terrain normal (ENU): [{:.4}, {:.4}, {:.4}]", normal.x, normal.y, normal.z);

    let cov = reference.surface_normal_cov_matrix(&point, &reference.surface_cov_matrix(&point));
    println!("Surface covariance along the normal (ECEF, m^2):{cov:.3}");
    println!("Open cells: {}", manager.open_cell_count());
}
