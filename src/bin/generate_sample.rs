use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use image::{GrayImage, Luma};
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use thermo_strata::data::columns;

/// Write a synthetic operating history plus one banded thermal image per row.
#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "sample_data")]
    out_dir: PathBuf,
    #[arg(long, default_value_t = 40)]
    rows: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Crude / emulsion / water brightness with soft transitions at the two
/// interfaces. `softness` widens the transition in rows.
fn tank_image(
    width: u32,
    height: u32,
    top: f64,
    bottom: f64,
    softness: f64,
    noise: &Normal<f64>,
    rng: &mut StdRng,
) -> GrayImage {
    let step = |y: f64, at: f64| 1.0 / (1.0 + (-(y - at) / softness.max(0.5)).exp());
    let (crude, emulsion, water) = (225.0, 155.0, 100.0);
    GrayImage::from_fn(width, height, |_, y| {
        let y = y as f64;
        let level = crude - (crude - emulsion) * step(y, top) - (emulsion - water) * step(y, bottom);
        Luma([(level + noise.sample(&mut *rng)).round().clamp(0.0, 255.0) as u8])
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let pixel_noise = Normal::new(0.0, 4.0)?;

    let image_dir = args.out_dir.join("images");
    std::fs::create_dir_all(&image_dir)
        .with_context(|| format!("creating {}", image_dir.display()))?;

    let (width, height) = (160u32, 512u32);
    let mut days = Vec::with_capacity(args.rows);
    let mut flow = Vec::with_capacity(args.rows);
    let mut level = Vec::with_capacity(args.rows);

    for i in 0..args.rows {
        // Alternate calm and disturbed stretches of five days.
        let turbulent = (i / 5) % 2 == 1;
        let (flow_sd, level_sd, softness) = if turbulent { (25.0, 6.0, 12.0) } else { (2.0, 0.5, 2.0) };

        days.push(i as i64);
        flow.push(120.0 + Normal::new(0.0, flow_sd)?.sample(&mut rng));
        level.push(60.0 + Normal::new(0.0, level_sd)?.sample(&mut rng));

        let top = height as f64 * rng.random_range(0.28..0.38);
        let bottom = height as f64 * rng.random_range(0.62..0.72);
        let img = tank_image(width, height, top, bottom, softness, &pixel_noise, &mut rng);
        let path = image_dir.join(format!("Imagen{}.png", i + 1));
        img.save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new(columns::DAY, DataType::Int64, false),
        Field::new(columns::FLOW, DataType::Float64, false),
        Field::new(columns::LEVEL, DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(days.clone())),
            Arc::new(Float64Array::from(flow.clone())),
            Arc::new(Float64Array::from(level.clone())),
        ],
    )
    .context("building record batch")?;

    let parquet_path = args.out_dir.join("history.parquet");
    let file = std::fs::File::create(&parquet_path)
        .with_context(|| format!("creating {}", parquet_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;

    let csv_path = args.out_dir.join("history.csv");
    let mut csv = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("creating {}", csv_path.display()))?;
    csv.write_record([columns::DAY, columns::FLOW, columns::LEVEL])?;
    for ((d, f), l) in days.iter().zip(&flow).zip(&level) {
        csv.write_record([d.to_string(), format!("{f:.3}"), format!("{l:.3}")])?;
    }
    csv.flush()?;

    println!(
        "Wrote {} rows to {} and {}, images to {}",
        args.rows,
        parquet_path.display(),
        csv_path.display(),
        image_dir.display()
    );
    Ok(())
}
