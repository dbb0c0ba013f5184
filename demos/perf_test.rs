use dewarp::{DewarpConfig, Dewarper};
use std::time::Instant;

fn main() {
    println!("=== Dewarp Performance Test ===\n");

    let init_start = Instant::now();
    let dewarper = Dewarper::new(DewarpConfig::default()).expect("Failed to create dewarper");
    println!("Initialization took: {:?}\n", init_start.elapsed());

    let test_images: Vec<String> = std::env::args().skip(1).collect();
    if test_images.is_empty() {
        println!("Usage: perf_test <image> [<image> ...]");
        return;
    }

    for path in &test_images {
        if !std::path::Path::new(path).exists() {
            println!("Skipping {} - file not found\n", path);
            continue;
        }

        println!("Testing {}:", path);

        // Warmup run
        println!("  Warmup run...");
        let _ = dewarper.dewarp_path(path);

        let num_runs = 5;
        let mut times = Vec::new();

        for i in 1..=num_runs {
            let start = Instant::now();
            let output = dewarper.dewarp_path(path).expect("Dewarp failed");
            let elapsed = start.elapsed();
            times.push(elapsed);

            let report = &output.report;
            println!(
                "  Run {}: {:?} - {} spans, {} points, {}x{} output",
                i, elapsed, report.spans, report.points, report.output_width, report.output_height
            );
        }

        let total: std::time::Duration = times.iter().sum();
        let avg = total / num_runs as u32;
        let min = times.iter().min().unwrap();
        let max = times.iter().max().unwrap();

        println!("\n  Statistics:");
        println!("    Average: {:?}", avg);
        println!("    Min: {:?}", min);
        println!("    Max: {:?}", max);
        println!("    Throughput: {:.2} images/sec\n", 1.0 / avg.as_secs_f64());
    }
}
