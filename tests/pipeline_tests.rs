//! Integration tests for block pipelines
//!
//! Builds small plans through the public builder and drives them the way a
//! consumer would: repeated `execute` calls, folding every answer back into
//! the demand stack until the root reports `Done`.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use aqlblock::executor::enumerate::ArrayProvider;
use aqlblock::executor::ExpressionRef;
use aqlblock::{
    Call, CallList, DemandStack, EngineBuilder, EngineConfig, ExecError, ExecuteResult,
    ExecutionEngine, ExecutionState, PlanNode, QueryContext, RegisterInfos, RowBlock, Value,
};

/// A pulled row: `Some(v)` for a data row, `None` for a shadow row
type Row = Option<i64>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("aqlblock=debug")
        .try_init();
}

fn context(config: EngineConfig) -> Arc<QueryContext> {
    QueryContext::new(1, config).unwrap()
}

/// Single register rows, `None` becoming a shadow row of depth 0
fn rows(layout: &[Row]) -> RowBlock {
    let mut block = RowBlock::new(layout.len(), 1);
    for row in layout {
        match row {
            Some(v) => block.push_row(vec![Value::Int(*v)]).unwrap(),
            None => block.push_shadow_row(0).unwrap(),
        };
    }
    block
}

fn singleton(block: RowBlock) -> PlanNode {
    PlanNode::Singleton {
        infos: RegisterInfos::passthrough(block.num_registers()),
        input: Some(block),
    }
}

fn pass_all(input: PlanNode) -> PlanNode {
    PlanNode::Filter {
        input: Box::new(input),
        infos: RegisterInfos::passthrough(1),
        condition: ExpressionRef::constant(Value::Bool(true)),
    }
}

/// Enumerate `0..n` into register 1, then keep the even values
fn even_numbers(n: i64) -> PlanNode {
    let list = Value::Array((0..n).map(Value::Int).collect());
    PlanNode::Filter {
        infos: RegisterInfos::passthrough(2),
        condition: ExpressionRef::from_fn(|row| {
            Ok(Value::Bool(row.value(1)?.as_int().unwrap_or(1) % 2 == 0))
        }),
        input: Box::new(enumerate(list)),
    }
}

fn enumerate(list: Value) -> PlanNode {
    PlanNode::Enumerate {
        infos: RegisterInfos::with_output(1),
        provider: Arc::new(ArrayProvider::new(0)),
        output_register: 1,
        input: Box::new(singleton(RowBlock::from_rows(1, vec![vec![list]]).unwrap())),
    }
}

fn collect(result: &ExecuteResult, reg: usize) -> Vec<Row> {
    let Some(block) = result.rows() else {
        return Vec::new();
    };
    (0..block.len())
        .map(|i| {
            if block.is_shadow_row(i) {
                None
            } else {
                block.value(i, reg).unwrap().as_int()
            }
        })
        .collect()
}

/// Everything the consumer saw while draining an engine
struct Drained {
    rows: Vec<Row>,
    skipped: Vec<u64>,
    calls: usize,
}

/// Execute until `Done`, accounting every answer into `stack`
fn drain(engine: &mut ExecutionEngine, mut stack: DemandStack, reg: usize) -> Drained {
    let mut drained = Drained {
        rows: Vec::new(),
        skipped: vec![0; stack.depth()],
        calls: 0,
    };
    loop {
        assert!(drained.calls < 1000, "pipeline made no progress");
        let result = engine.execute(stack.clone()).unwrap();
        drained.calls += 1;
        assert_ne!(result.state, ExecutionState::Waiting);

        drained.rows.extend(collect(&result, reg));
        for (depth, n) in result.skipped.iter() {
            drained.skipped[depth] += n;
        }
        stack.account(&result.skipped, result.rows());
        if result.state == ExecutionState::Done {
            return drained;
        }
    }
}

#[test]
fn test_offset_with_shadow_rows() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let plan = pass_all(singleton(rows(&[Some(0), Some(1), Some(2), None, Some(4), None])));
    let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

    let stack = DemandStack::new(Call::with_soft_limit(10).offset(2)).with_outer(Call::new());
    let drained = drain(&mut engine, stack, 0);

    // The offset only covers the first iteration
    assert_eq!(drained.rows, vec![Some(2), None, Some(4), None]);
    assert_eq!(drained.skipped, vec![2, 0]);
}

#[test]
fn test_full_count_only() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let plan = PlanNode::Id {
        input: Box::new(singleton(rows(&[Some(1), Some(2), Some(3), Some(4)]))),
        infos: RegisterInfos::passthrough(1),
    };
    let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

    let result = engine
        .execute(DemandStack::new(Call::full_count_only()))
        .unwrap();
    assert_eq!(result.state, ExecutionState::Done);
    assert!(result.rows().is_none());
    assert_eq!(result.skipped.as_slice(), &[4]);
}

#[test]
fn test_demand_is_conserved() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..20 {
        let n: i64 = rng.gen_range(0..40);
        let evens = ((n + 1) / 2) as u64;
        let offset: u64 = rng.gen_range(0..25);
        let limit: u64 = rng.gen_range(0..25);
        let full_count = rng.gen_bool(0.5);
        let batch = rng.gen_range(1..6);

        let ctx = context(EngineConfig::default().with_batch_size(batch));
        let mut engine = EngineBuilder::new(ctx).build(even_numbers(n)).unwrap();
        let mut call = Call::with_hard_limit(limit).offset(offset);
        if full_count {
            call = call.full_count();
        }
        let drained = drain(&mut engine, DemandStack::new(call), 1);

        let produced = drained.rows.len() as u64;
        assert!(drained.rows.iter().all(Option::is_some));
        assert_eq!(produced, limit.min(evens.saturating_sub(offset)));
        if full_count {
            assert_eq!(produced + drained.skipped[0], evens);
        } else {
            assert_eq!(drained.skipped[0], offset.min(evens));
        }

        let expected: Vec<Row> = (0..n)
            .filter(|v| v % 2 == 0)
            .skip(offset as usize)
            .take(limit as usize)
            .map(Some)
            .collect();
        assert_eq!(drained.rows, expected);
    }
}

#[test]
fn test_blocks_never_cross_shadow_rows() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(42);
    let mut input = Vec::new();
    let mut next = 0;
    for _ in 0..12 {
        for _ in 0..rng.gen_range(0..5) {
            input.push(Some(next));
            next += 1;
        }
        input.push(None);
    }

    let ctx = context(EngineConfig::default());
    let mut engine = EngineBuilder::new(ctx)
        .build(pass_all(singleton(rows(&input))))
        .unwrap();

    let mut seen = Vec::new();
    loop {
        // A fresh soft limit per call, as a streaming consumer would send
        let stack = DemandStack::new(Call::with_soft_limit(2)).with_outer(Call::new());
        let result = engine.execute(stack).unwrap();
        let block = collect(&result, 0);

        let data = block.iter().filter(|r| r.is_some()).count();
        assert!(data <= 2);
        if let Some(pos) = block.iter().position(Option::is_none) {
            assert_eq!(pos, block.len() - 1, "rows after a shadow row: {:?}", block);
        }
        seen.extend(block);
        if result.state == ExecutionState::Done {
            break;
        }
    }
    assert_eq!(seen, input);
}

#[test]
fn test_done_is_idempotent() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let mut engine = EngineBuilder::new(ctx).build(even_numbers(6)).unwrap();

    let drained = drain(&mut engine, DemandStack::new(Call::new()), 1);
    assert_eq!(drained.rows, vec![Some(0), Some(2), Some(4)]);

    for _ in 0..3 {
        let result = engine.execute(DemandStack::new(Call::new())).unwrap();
        assert_eq!(result.state, ExecutionState::Done);
        assert!(result.rows().is_none());
        assert_eq!(result.skipped.total(), 0);
    }
}

#[test]
fn test_passthrough_keeps_row_content() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let input = RowBlock::from_rows(
        2,
        (1..=3).map(|v| vec![Value::Int(v), Value::Null]).collect(),
    )
    .unwrap();
    let plan = PlanNode::Calculation {
        input: Box::new(singleton(input)),
        infos: RegisterInfos::in_place(2, 1),
        expression: ExpressionRef::from_fn(|row| {
            Ok(Value::Int(row.value(0)?.as_int().unwrap_or(0) * 10))
        }),
        output_register: 1,
    };
    let mut engine = EngineBuilder::new(Arc::clone(&ctx)).build(plan).unwrap();

    let result = engine.execute(DemandStack::new(Call::new())).unwrap();
    assert_eq!(result.state, ExecutionState::Done);
    assert_eq!(collect(&result, 0), vec![Some(1), Some(2), Some(3)]);
    assert_eq!(collect(&result, 1), vec![Some(10), Some(20), Some(30)]);
    assert_eq!(ctx.block_manager().allocated(), 0);
}

#[test]
fn test_subquery_offset_and_limit() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let input = rows(&[Some(1), Some(2), None, Some(3), Some(4), None, Some(5), None]);
    let mut engine = EngineBuilder::new(ctx)
        .build(pass_all(singleton(input)))
        .unwrap();

    // Only the second iteration is wanted
    let stack = DemandStack::from_frames(vec![
        CallList::new(Call::new()),
        CallList::new(Call::with_hard_limit(1).offset(1)),
    ]);
    let drained = drain(&mut engine, stack, 0);

    assert_eq!(drained.rows, vec![Some(3), Some(4), None]);
    assert_eq!(drained.skipped, vec![0, 1]);
}

#[test]
fn test_per_iteration_limit() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let input = rows(&[Some(1), Some(2), Some(3), None, Some(4), None, Some(5), Some(6), None]);
    let mut engine = EngineBuilder::new(ctx)
        .build(pass_all(singleton(input)))
        .unwrap();

    let stack = DemandStack::from_frames(vec![
        CallList::with_default(Call::with_hard_limit(1)),
        CallList::new(Call::new()),
    ]);
    let drained = drain(&mut engine, stack, 0);

    assert_eq!(
        drained.rows,
        vec![Some(1), None, Some(4), None, Some(5), None]
    );
}

#[test]
fn test_limit_full_count_statistics() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let plan = PlanNode::Limit {
        input: Box::new(even_numbers(20)),
        infos: RegisterInfos::passthrough(2),
        offset: 2,
        limit: 3,
        full_count: true,
    };
    let mut engine = EngineBuilder::new(Arc::clone(&ctx)).build(plan).unwrap();

    let drained = drain(&mut engine, DemandStack::new(Call::new()), 1);
    assert_eq!(drained.rows, vec![Some(4), Some(6), Some(8)]);

    let stats = ctx.stats();
    assert_eq!(stats.full_count, 10);
    assert_eq!(stats.scanned, 20);
    assert_eq!(stats.filtered, 10);
}

#[test]
fn test_gather_aligns_iterations() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let plan = PlanNode::Gather {
        inputs: vec![
            singleton(rows(&[Some(1), Some(2), None, Some(3), None])),
            singleton(rows(&[Some(10), None, Some(11), Some(12), None])),
        ],
        infos: RegisterInfos::passthrough(1),
    };
    let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

    let stack = DemandStack::new(Call::new()).with_outer(Call::new());
    let drained = drain(&mut engine, stack, 0);
    assert_eq!(
        drained.rows,
        vec![Some(1), Some(2), Some(10), None, Some(3), Some(11), Some(12), None]
    );
}

#[test]
fn test_gather_rejects_misaligned_inputs() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let plan = PlanNode::Gather {
        inputs: vec![singleton(rows(&[Some(1), None])), singleton(rows(&[Some(2)]))],
        infos: RegisterInfos::passthrough(1),
    };
    let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

    let stack = DemandStack::new(Call::new()).with_outer(Call::new());
    let mut failed = false;
    for _ in 0..10 {
        match engine.execute(stack.clone()) {
            Ok(result) if result.state == ExecutionState::Done => break,
            Ok(_) => {}
            Err(e) => {
                assert!(matches!(e, ExecError::Internal(_)), "{}", e);
                failed = true;
                break;
            }
        }
    }
    assert!(failed);
}

#[test]
fn test_killed_query() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let mut engine = EngineBuilder::new(Arc::clone(&ctx))
        .build(even_numbers(10))
        .unwrap();

    ctx.kill();
    let err = engine.execute(DemandStack::new(Call::new())).unwrap_err();
    assert!(matches!(err, ExecError::Killed(1)));
}

#[test]
fn test_engine_shutdown_once() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let mut engine = EngineBuilder::new(ctx).build(even_numbers(4)).unwrap();

    engine.shutdown(0).unwrap();
    assert!(engine.is_shut_down());
    engine.shutdown(0).unwrap();

    let err = engine.execute(DemandStack::new(Call::new())).unwrap_err();
    assert!(matches!(err, ExecError::InvalidCall(_)));
}

#[test]
fn test_invalid_stack_rejected() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let mut engine = EngineBuilder::new(ctx).build(even_numbers(4)).unwrap();

    let bad = Call {
        soft_limit: Some(1),
        hard_limit: Some(1),
        ..Call::default()
    };
    assert!(engine.execute(DemandStack::new(bad)).is_err());
    assert!(engine
        .execute(DemandStack::from_frames(Vec::new()))
        .is_err());
}

#[test]
fn test_initialize_cursor_reruns_with_new_input() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let mut engine = EngineBuilder::new(ctx)
        .build(pass_all(singleton(rows(&[Some(1), Some(2)]))))
        .unwrap();

    let drained = drain(&mut engine, DemandStack::new(Call::new()), 0);
    assert_eq!(drained.rows, vec![Some(1), Some(2)]);

    engine
        .initialize_cursor(Some(&rows(&[Some(7), Some(8), Some(9)])))
        .unwrap();
    let drained = drain(&mut engine, DemandStack::new(Call::new()), 0);
    assert_eq!(drained.rows, vec![Some(7), Some(8), Some(9)]);
}

fn int_array(values: &[i64]) -> Value {
    Value::Array(values.iter().map(|v| Value::Int(*v)).collect())
}

/// One iteration per list: the array as a data row, then a depth-0 shadow
/// row carrying the same array
fn iterations(lists: &[Vec<i64>]) -> RowBlock {
    let mut block = RowBlock::new(lists.len() * 2, 1);
    for list in lists {
        let array = int_array(list);
        block.push_row(vec![array.clone()]).unwrap();
        block.push_shadow_row_from(0, &[array]).unwrap();
    }
    block
}

/// Enumerate the array of every iteration into register 1
fn enumerate_iterations(lists: &[Vec<i64>]) -> PlanNode {
    PlanNode::Enumerate {
        infos: RegisterInfos::with_output(1),
        provider: Arc::new(ArrayProvider::new(0)),
        output_register: 1,
        input: Box::new(singleton(iterations(lists))),
    }
}

#[test]
fn test_outer_offset_through_chain() {
    init_tracing();
    let lists = vec![vec![1, 2], vec![3], vec![4, 5]];

    for (batch, offset) in [(1, 1), (2, 1), (3, 1), (1000, 1), (1, 2), (2, 2), (4, 2)] {
        let ctx = context(EngineConfig::default().with_batch_size(batch));
        let plan = PlanNode::Id {
            input: Box::new(enumerate_iterations(&lists)),
            infos: RegisterInfos::passthrough(2),
        };
        let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

        let stack = DemandStack::new(Call::new()).with_outer(Call::new().offset(offset));
        let drained = drain(&mut engine, stack, 1);

        let expected = if offset == 1 {
            vec![Some(3), None, Some(4), Some(5), None]
        } else {
            vec![Some(4), Some(5), None]
        };
        assert_eq!(drained.rows, expected, "batch {}", batch);
        assert_eq!(drained.skipped, vec![0, offset]);
    }
}

#[test]
fn test_subquery_demand_is_conserved() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(0xd00d);

    for round in 0..40 {
        let k: usize = rng.gen_range(0..6);
        let lists: Vec<Vec<i64>> = (0..k as i64)
            .map(|i| (0..rng.gen_range(0..6)).map(|j| i * 100 + j).collect())
            .collect();
        let inner_offset: u64 = rng.gen_range(0..4);
        let inner_limit: u64 = rng.gen_range(1..4);
        let outer_offset: u64 = rng.gen_range(0..4);
        let outer_limit: u64 = rng.gen_range(1..5);
        let full_count = rng.gen_bool(0.5);
        let batch = rng.gen_range(1..5);

        let mut plan = enumerate_iterations(&lists);
        for _ in 0..rng.gen_range(0..3) {
            plan = if rng.gen_bool(0.5) {
                PlanNode::Id {
                    input: Box::new(plan),
                    infos: RegisterInfos::passthrough(2),
                }
            } else {
                PlanNode::Filter {
                    input: Box::new(plan),
                    infos: RegisterInfos::passthrough(2),
                    condition: ExpressionRef::constant(Value::Bool(true)),
                }
            };
        }

        let ctx = context(EngineConfig::default().with_batch_size(batch));
        let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();
        let mut outer = Call::with_hard_limit(outer_limit).offset(outer_offset);
        if full_count {
            outer = outer.full_count();
        }
        let stack = DemandStack::from_frames(vec![
            CallList::with_default(Call::with_hard_limit(inner_limit).offset(inner_offset)),
            CallList::new(outer),
        ]);
        let drained = drain(&mut engine, stack, 1);

        let delivered: Vec<&Vec<i64>> = lists
            .iter()
            .skip(outer_offset as usize)
            .take(outer_limit as usize)
            .collect();
        let mut expected = Vec::new();
        for list in &delivered {
            expected.extend(
                list.iter()
                    .skip(inner_offset as usize)
                    .take(inner_limit as usize)
                    .map(|v| Some(*v)),
            );
            expected.push(None);
        }
        assert_eq!(drained.rows, expected, "round {}", round);

        let inner_skipped: u64 = delivered
            .iter()
            .map(|list| inner_offset.min(list.len() as u64))
            .sum();
        let outer_skipped = if full_count {
            (k - delivered.len()) as u64
        } else {
            outer_offset.min(k as u64)
        };
        assert_eq!(drained.skipped, vec![inner_skipped, outer_skipped], "round {}", round);
    }
}

/// Arrays in register 0; the subquery counts the elements of each into
/// register 1 as a one element array
fn count_elements(lists: &[Vec<i64>]) -> PlanNode {
    let block =
        RowBlock::from_rows(1, lists.iter().map(|l| vec![int_array(l)]).collect()).unwrap();
    let start = PlanNode::SubqueryStart {
        input: Box::new(singleton(block)),
        infos: RegisterInfos::passthrough(1),
    };
    let elements = PlanNode::Enumerate {
        input: Box::new(start),
        infos: RegisterInfos::with_output(1),
        provider: Arc::new(ArrayProvider::new(0)),
        output_register: 1,
    };
    let count = PlanNode::CountCollect {
        input: Box::new(elements),
        infos: RegisterInfos::collect(2),
        output_register: 2,
    };
    PlanNode::SubqueryEnd {
        input: Box::new(count),
        infos: RegisterInfos {
            num_input_registers: 3,
            num_output_registers: 3,
            registers_to_keep: vec![0],
            registers_to_clear: vec![1, 2],
            output_registers: vec![1],
        },
        in_register: 2,
        output_register: 1,
    }
}

/// Full register contents of every row pulled until `Done`, with the
/// skip counts per depth
fn drain_rows(
    engine: &mut ExecutionEngine,
    mut stack: DemandStack,
) -> (Vec<Vec<Value>>, Vec<u64>) {
    let mut rows = Vec::new();
    let mut skipped = vec![0; stack.depth()];
    for _ in 0..100 {
        let result = engine.execute(stack.clone()).unwrap();
        if let Some(block) = result.rows() {
            for i in 0..block.len() {
                rows.push(block.row_values(i).to_vec());
            }
        }
        for (depth, n) in result.skipped.iter() {
            skipped[depth] += n;
        }
        stack.account(&result.skipped, result.rows());
        if result.state == ExecutionState::Done {
            return (rows, skipped);
        }
    }
    panic!("pipeline made no progress");
}

#[test]
fn test_subquery_counts_per_row() {
    init_tracing();
    let lists = vec![vec![1, 2, 3], vec![], vec![4, 5]];

    for batch in [1, 2, 1000] {
        let ctx = context(EngineConfig::default().with_batch_size(batch));
        let mut engine = EngineBuilder::new(Arc::clone(&ctx))
            .build(count_elements(&lists))
            .unwrap();

        let (rows, _) = drain_rows(&mut engine, DemandStack::new(Call::new()));
        let counts: Vec<&Value> = rows.iter().map(|row| &row[1]).collect();
        assert_eq!(
            counts,
            vec![&int_array(&[3]), &int_array(&[0]), &int_array(&[2])],
            "batch {}",
            batch
        );
        assert_eq!(rows[2][0], int_array(&[4, 5]));
        assert_eq!(ctx.block_manager().allocated(), 0);
    }
}

#[test]
fn test_subquery_result_with_offset_and_limit() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let lists = vec![vec![1, 2, 3], vec![], vec![4, 5]];
    let mut engine = EngineBuilder::new(ctx)
        .build(count_elements(&lists))
        .unwrap();

    let (rows, skipped) = drain_rows(
        &mut engine,
        DemandStack::new(Call::with_hard_limit(1).offset(1)),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], int_array(&[]));
    assert_eq!(rows[0][1], int_array(&[0]));
    assert_eq!(skipped, vec![1]);
}

#[test]
fn test_nested_subquery_start() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let mut input = RowBlock::new(2, 1);
    input.push_row(vec![Value::Int(7)]).unwrap();
    input.push_shadow_row_from(0, &[Value::Int(7)]).unwrap();
    let plan = PlanNode::SubqueryStart {
        input: Box::new(singleton(input)),
        infos: RegisterInfos::passthrough(1),
    };
    let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

    let mut stack = DemandStack::new(Call::new())
        .with_outer(Call::new())
        .with_outer(Call::new());
    let mut seen = Vec::new();
    for _ in 0..10 {
        let result = engine.execute(stack.clone()).unwrap();
        if let Some(block) = result.rows() {
            for i in 0..block.len() {
                seen.push((block.shadow_depth(i), block.value(i, 0).unwrap().as_int()));
            }
        }
        stack.account(&result.skipped, result.rows());
        if result.state == ExecutionState::Done {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![(None, Some(7)), (Some(0), Some(7)), (Some(1), Some(7))]
    );
}

#[test]
fn test_subquery_start_needs_enclosing_frame() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let plan = PlanNode::SubqueryStart {
        input: Box::new(singleton(rows(&[Some(1)]))),
        infos: RegisterInfos::passthrough(1),
    };
    let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

    let err = engine.execute(DemandStack::new(Call::new())).unwrap_err();
    assert!(matches!(err, ExecError::InvalidCall(_)), "{}", err);
}

#[test]
fn test_subquery_end_requires_closing_shadow_row() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let plan = PlanNode::SubqueryEnd {
        input: Box::new(singleton(rows(&[Some(1), Some(2)]))),
        infos: RegisterInfos::with_output(1),
        in_register: 0,
        output_register: 1,
    };
    let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

    let mut failed = false;
    for _ in 0..10 {
        match engine.execute(DemandStack::new(Call::new())) {
            Ok(result) if result.state == ExecutionState::Done => break,
            Ok(_) => {}
            Err(e) => {
                assert!(matches!(e, ExecError::Internal(_)), "{}", e);
                failed = true;
                break;
            }
        }
    }
    assert!(failed);
}

#[test]
fn test_count_of_empty_input() {
    init_tracing();
    let ctx = context(EngineConfig::default());
    let plan = PlanNode::CountCollect {
        input: Box::new(singleton(RowBlock::new(0, 1))),
        infos: RegisterInfos::collect(1),
        output_register: 1,
    };
    let mut engine = EngineBuilder::new(ctx).build(plan).unwrap();

    let drained = drain(&mut engine, DemandStack::new(Call::new()), 1);
    assert_eq!(drained.rows, vec![Some(0)]);
}
