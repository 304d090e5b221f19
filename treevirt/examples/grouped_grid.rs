// Example: group a flat dataset by region, with footer sums.
use treevirt::{
    AggregateDescriptor, AggregateKind, AggregatePlacement, EntryKind, GroupDescriptor, Projector,
    ProjectorOptions, Value,
};

#[derive(Clone, Debug)]
struct Sale {
    region: &'static str,
    product: &'static str,
    units: i64,
}

fn main() -> treevirt::Result<()> {
    let sales = [
        ("East", "Chairs", 12),
        ("West", "Desks", 4),
        ("East", "Lamps", 30),
        ("North", "Chairs", 7),
        ("West", "Chairs", 9),
    ]
    .into_iter()
    .map(|(region, product, units)| Sale {
        region,
        product,
        units,
    });

    let options = ProjectorOptions::<Sale>::flat().with_value_provider(|s: &Sale, column: &str| match column {
        "region" => Value::from(s.region),
        "units" => Value::from(s.units),
        _ => Value::Null,
    });
    let mut p = Projector::with_items(options, sales)?;
    p.set_groups(vec![GroupDescriptor::by_column("region")]);
    p.set_aggregates(vec![AggregateDescriptor::column(
        AggregatePlacement::Both,
        "units",
        AggregateKind::Sum,
    )]);

    for entry in p.entries() {
        let indent = "  ".repeat(entry.level);
        match &entry.kind {
            EntryKind::GroupHeader(h) => println!("{indent}{}", h.header),
            EntryKind::Node { item, .. } => println!("{indent}{} ({})", item.product, item.units),
            EntryKind::Summary(s) => {
                let cells: Vec<&str> = s.cells.iter().map(|c| c.text.as_str()).collect();
                println!("{indent}sum: {}", cells.join(", "));
            }
        }
    }

    // Collapsing a group drops its rows but keeps the cached sums.
    p.toggle_expansion(0)?;
    println!("rows after collapse={} evaluations={}", p.row_count(), p.aggregate_evaluations());
    Ok(())
}
