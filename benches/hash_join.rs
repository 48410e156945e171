//! Build+probe throughput for `joinHash-inner` (§4.11), matching the
//! teacher's `benches/` convention of one `criterion` file per hot path.
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use opflow_core::ctx::ExecutionContext;
use opflow_core::op::build_operator;
use opflow_core::plan::{ExprNode, OperatorNode, Param};
use opflow_core::value::{Labels, Val, Vals};
use std::sync::Arc;

fn scan(width: i64, rows: i64) -> Arc<OperatorNode> {
	let labels = Labels::new(vec!["k".into(), "v".into()]);
	let vals: Vec<Vals> = (0..rows)
		.map(|i| {
			Vals(vec![
				Val::from_json_bytes((i % width).to_string()),
				Val::from_json_bytes(i.to_string()),
			])
		})
		.collect();
	OperatorNode::new("scan", labels, vec![Param::Rows(Arc::new(vals))], vec![])
}

fn key_node() -> Param {
	Param::Expr(ExprNode::new("labelPath", vec![Param::Str("k".into())]))
}

fn bench_hash_join(c: &mut Criterion) {
	let mut group = c.benchmark_group("joinHash-inner");
	for &rows in &[1_000i64, 10_000, 100_000] {
		group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
			let left = scan(rows / 10, rows);
			let right = scan(rows / 10, rows);
			let labels = left.labels.concat(&right.labels);
			let node = OperatorNode::new("joinHash-inner", labels, vec![key_node(), key_node()], vec![left, right]);
			let exec = build_operator(&node).unwrap();
			let ctx = ExecutionContext::background();
			b.iter(|| {
				let mut count = 0u64;
				let mut yv = |_row: &Vals| -> bool {
					count += 1;
					true
				};
				let mut err = None;
				let mut ye = |e: Option<opflow_core::Error>| err = e;
				exec(&ctx, &mut yv, &mut ye);
				assert!(err.is_none());
				count
			});
		});
	}
	group.finish();
}

criterion_group!(benches, bench_hash_join);
criterion_main!(benches);
