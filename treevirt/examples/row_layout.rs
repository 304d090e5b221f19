// Example: lazily measured row heights over a million rows.
use treevirt::{LayoutOptions, RowLayoutEstimator};

fn main() {
    let options = LayoutOptions::default()
        .with_default_row_height(28)
        .with_measure(|row| if row % 10 == 0 { 56 } else { 24 });
    let mut layout = RowLayoutEstimator::new(1_000_000, options);
    println!("estimated total={}", layout.get_total_height());

    let range = layout.get_visible_range(500_000, 600, 3);
    println!(
        "visible={}..{} buffered={}..{} measured={}",
        range.start_index,
        range.end_index,
        range.buffered_start(),
        range.buffered_end(),
        layout.measured_count()
    );

    // Measurements can be carried to a fresh estimator, e.g. across sessions.
    let saved = layout.export_measurements();
    let mut restored = RowLayoutEstimator::new(1_000_000, LayoutOptions::default());
    restored.import_measurements(saved);
    println!(
        "restored measured={} top(range start)={}",
        restored.measured_count(),
        restored.get_row_top(range.start_index)
    );
}
