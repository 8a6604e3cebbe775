//! Dry-run generation: expand a small grammar and print the queries.
//!
//! ```sh
//! cargo run --example dry_run
//! ```

use squall::prelude::*;

fn main() {
    let grammar = GrammarBuilder::new("orders")
        .rule(
            "query",
            weighted([
                (template("SELECT {cols} FROM orders WHERE total > {n};"), 4),
                (template("INSERT INTO orders (id, total) VALUES ({n}, {n});"), 2),
                (lit("DELETE FROM orders WHERE total < 0;"), 1),
            ]),
        )
        .rule("cols", repeat(rule_ref("col"), 1, 3, ", "))
        .rule("col", choice([lit("id"), lit("total"), lit("created_at")]))
        .rule("n", number(1, 10_000))
        .freeze()
        .expect("valid grammar");

    let config = RunConfig {
        grammar: "orders".to_owned(),
        count: Some(20),
        workers: 2,
        seed: Some(42),
        deterministic: true,
        output: OutputConfig {
            sink: SinkMode::Stdout,
            path: None,
        },
        ..RunConfig::default()
    };

    let summary = Runner::new(config)
        .register(grammar)
        .run()
        .expect("run failed");

    eprintln!(
        "generated {} queries with master seed {}",
        summary.snapshot.generated, summary.master_seed
    );
}
