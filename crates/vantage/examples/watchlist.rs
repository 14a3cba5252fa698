//! Vantage Watchlist Example
//!
//! Drives a projection view over a mutable watchlist: groups tickers by
//! sector, sorts by symbol, filters out small positions, and prints the
//! change packets the projection emits as the source mutates.
//!
//! Run with: cargo run -p vantage --example watchlist

use std::sync::Arc;

use vantage::{
    FieldValue, FilterArgs, FilterSpec, ProjectionView, Record, SortSpec, VecSource,
};

#[derive(Clone, PartialEq, Debug)]
struct Position {
    symbol: String,
    sector: String,
    shares: i64,
}

impl Position {
    fn new(symbol: &str, sector: &str, shares: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            sector: sector.to_string(),
            shares,
        }
    }
}

impl Record for Position {
    fn field(&self, name: &str) -> FieldValue {
        match name {
            "symbol" => FieldValue::from(self.symbol.as_str()),
            "sector" => FieldValue::from(self.sector.as_str()),
            "shares" => FieldValue::Int(self.shares),
            _ => FieldValue::None,
        }
    }

    fn identity(&self) -> FieldValue {
        FieldValue::from(self.symbol.as_str())
    }
}

fn print_view(view: &ProjectionView<Position>) {
    view.for_each(|item| match item.group_id() {
        Some(sector) => println!("== {sector} =="),
        None => {
            if let Some(line) = item.with_record(|p| format!("  {} x{}", p.symbol, p.shares)) {
                println!("{line}");
            }
        }
    });
}

fn main() {
    tracing_subscriber::fmt::init();

    let source = Arc::new(VecSource::new(vec![
        Position::new("NVDA", "Tech", 120),
        Position::new("XOM", "Energy", 40),
        Position::new("AAPL", "Tech", 15),
        Position::new("CVX", "Energy", 80),
    ]));

    let view = ProjectionView::new(source.clone()).expect("projection over a vec source");

    view.signals().changed.connect(|packet| {
        println!(
            "-> {:?} ({} new, {} old) at {:?}",
            packet.action,
            packet.new_items.len(),
            packet.old_items.len(),
            packet.new_index
        );
    });

    view.set_group(Some(Arc::new(|p: &Position| {
        FieldValue::from(p.sector.as_str())
    })))
    .expect("group by sector");
    view.set_sort(vec![SortSpec::by_field("symbol")])
        .expect("sort by symbol");
    view.set_filter(vec![FilterSpec::new(|args: &FilterArgs<'_, Position>| match args.record {
        Some(p) => p.shares >= 20,
        None => args.group_has_visible_members.unwrap_or(true),
    })])
    .expect("filter small positions");

    println!("initial projection:");
    print_view(&view);

    println!("\nbuying MSFT, selling down AAPL below the filter threshold:");
    source.push(Position::new("MSFT", "Tech", 60));
    source.modify(2, &["shares"], |p| p.shares = 5);

    println!("\nfinal projection:");
    print_view(&view);
}
