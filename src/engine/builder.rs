//! Engine builder
//!
//! Builds block trees from plan descriptions whose register layouts have
//! already been resolved by the planner.

use std::sync::Arc;

use tokio::runtime::Handle;

use super::block::ExecutionBlockImpl;
use super::query::{ExecutionEngine, QueryContext};
use super::subquery::{SubqueryEndBlock, SubqueryStartBlock};
use super::ExecutionBlock;
use crate::block::{RegisterId, RegisterInfos, RowBlock, Value};
use crate::cluster::{RemoteBlock, RemoteTransport, Scatter, ScatterMode};
use crate::executor::error::{ExecError, ExecResult};
use crate::executor::{
    CalculationExecutor, CountCollectExecutor, CursorProvider, EnumerateExecutor, ExpressionRef,
    FilterExecutor, IdExecutor, LimitExecutor,
};
use crate::fetcher::Fetcher;

/// Plan node with resolved registers
pub enum PlanNode {
    /// Start of a query or subquery; one row of nulls unless `input` is given
    Singleton {
        infos: RegisterInfos,
        input: Option<RowBlock>,
    },
    Id {
        input: Box<PlanNode>,
        infos: RegisterInfos,
    },
    Filter {
        input: Box<PlanNode>,
        infos: RegisterInfos,
        condition: ExpressionRef,
    },
    Calculation {
        input: Box<PlanNode>,
        infos: RegisterInfos,
        expression: ExpressionRef,
        output_register: RegisterId,
    },
    Enumerate {
        input: Box<PlanNode>,
        infos: RegisterInfos,
        provider: Arc<dyn CursorProvider>,
        output_register: RegisterId,
    },
    Limit {
        input: Box<PlanNode>,
        infos: RegisterInfos,
        offset: u64,
        limit: u64,
        full_count: bool,
    },
    /// Count the rows of every iteration into `output_register`
    CountCollect {
        input: Box<PlanNode>,
        infos: RegisterInfos,
        output_register: RegisterId,
    },
    /// Open a subquery; the nodes above it up to the matching
    /// [`PlanNode::SubqueryEnd`] run once per input row
    SubqueryStart {
        input: Box<PlanNode>,
        infos: RegisterInfos,
    },
    /// Close a subquery, writing the `in_register` values of each iteration
    /// as an array into `output_register`
    SubqueryEnd {
        input: Box<PlanNode>,
        infos: RegisterInfos,
        in_register: RegisterId,
        output_register: RegisterId,
    },
    Gather {
        inputs: Vec<PlanNode>,
        infos: RegisterInfos,
    },
    Remote {
        query_id: u64,
        client_id: String,
        transport: Arc<dyn RemoteTransport>,
    },
    ScatterClient {
        scatter: Scatter,
        client_id: String,
        infos: RegisterInfos,
    },
    DistributeConsumer {
        scatter: Scatter,
        distribute_id: String,
        infos: RegisterInfos,
    },
}

/// Builds execution blocks for one query
pub struct EngineBuilder {
    ctx: Arc<QueryContext>,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    pub fn new(ctx: Arc<QueryContext>) -> Self {
        EngineBuilder { ctx, runtime: None }
    }

    /// Runtime that carries remote requests; defaults to the current one
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build an engine from a plan
    pub fn build(&self, plan: PlanNode) -> ExecResult<ExecutionEngine> {
        let root = self.build_node(plan)?;
        tracing::debug!(query_id = self.ctx.id(), root = ?root, "built block tree");
        Ok(ExecutionEngine::new(Arc::clone(&self.ctx), root))
    }

    /// Build a scatter whose clients are wired with [`PlanNode::ScatterClient`]
    /// or [`PlanNode::DistributeConsumer`]
    pub fn build_scatter(
        &self,
        input: PlanNode,
        mode: ScatterMode,
        client_ids: Vec<String>,
    ) -> ExecResult<Scatter> {
        let upstream = self.build_node(input)?;
        Scatter::new(
            upstream,
            mode,
            client_ids,
            self.ctx.config().scatter_max_buffered_blocks,
        )
    }

    pub fn build_node(&self, plan: PlanNode) -> ExecResult<ExecutionBlock> {
        let ctx = Arc::clone(&self.ctx);
        match plan {
            PlanNode::Singleton { infos, input } => {
                let input = match input {
                    Some(block) => block,
                    None => {
                        let n = infos.num_input_registers;
                        RowBlock::from_rows(n, vec![vec![Value::Null; n]])?
                    }
                };
                Ok(ExecutionBlock::Singleton(ExecutionBlockImpl::new(
                    IdExecutor::new(),
                    Fetcher::constant(Some(input)),
                    infos,
                    ctx,
                )?))
            }

            PlanNode::Id { input, infos } => {
                let dependency = self.build_node(*input)?;
                Ok(ExecutionBlock::Id(ExecutionBlockImpl::new(
                    IdExecutor::new(),
                    Fetcher::single(dependency),
                    infos,
                    ctx,
                )?))
            }

            PlanNode::Filter {
                input,
                infos,
                condition,
            } => {
                let dependency = self.build_node(*input)?;
                Ok(ExecutionBlock::Filter(ExecutionBlockImpl::new(
                    FilterExecutor::new(condition),
                    Fetcher::single(dependency),
                    infos,
                    ctx,
                )?))
            }

            PlanNode::Calculation {
                input,
                infos,
                expression,
                output_register,
            } => {
                let dependency = self.build_node(*input)?;
                Ok(ExecutionBlock::Calculation(ExecutionBlockImpl::new(
                    CalculationExecutor::new(expression, output_register),
                    Fetcher::single(dependency),
                    infos,
                    ctx,
                )?))
            }

            PlanNode::Enumerate {
                input,
                infos,
                provider,
                output_register,
            } => {
                let dependency = self.build_node(*input)?;
                Ok(ExecutionBlock::Enumerate(ExecutionBlockImpl::new(
                    EnumerateExecutor::new(provider, output_register),
                    Fetcher::single(dependency),
                    infos,
                    ctx,
                )?))
            }

            PlanNode::Limit {
                input,
                infos,
                offset,
                limit,
                full_count,
            } => {
                let dependency = self.build_node(*input)?;
                Ok(ExecutionBlock::Limit(ExecutionBlockImpl::new(
                    LimitExecutor::new(offset, limit, full_count),
                    Fetcher::single(dependency),
                    infos,
                    ctx,
                )?))
            }

            PlanNode::CountCollect {
                input,
                infos,
                output_register,
            } => {
                if !infos.registers_to_keep.is_empty() {
                    return Err(ExecError::InvalidRegisterPlan(
                        "count collect keeps no input register".to_string(),
                    ));
                }
                let dependency = self.build_node(*input)?;
                Ok(ExecutionBlock::Collect(ExecutionBlockImpl::new(
                    CountCollectExecutor::new(output_register),
                    Fetcher::single(dependency),
                    infos,
                    ctx,
                )?))
            }

            PlanNode::SubqueryStart { input, infos } => {
                let dependency = self.build_node(*input)?;
                Ok(ExecutionBlock::SubqueryStart(SubqueryStartBlock::new(
                    Fetcher::single(dependency),
                    infos,
                    ctx,
                )?))
            }

            PlanNode::SubqueryEnd {
                input,
                infos,
                in_register,
                output_register,
            } => {
                let dependency = self.build_node(*input)?;
                Ok(ExecutionBlock::SubqueryEnd(SubqueryEndBlock::new(
                    Fetcher::single(dependency),
                    infos,
                    in_register,
                    output_register,
                    ctx,
                )?))
            }

            PlanNode::Gather { inputs, infos } => {
                let dependencies = inputs
                    .into_iter()
                    .map(|input| self.build_node(input))
                    .collect::<ExecResult<Vec<_>>>()?;
                let fetcher = Fetcher::multi(dependencies, infos.num_input_registers);
                Ok(ExecutionBlock::Gather(ExecutionBlockImpl::new(
                    IdExecutor::new(),
                    fetcher,
                    infos,
                    ctx,
                )?))
            }

            PlanNode::Remote {
                query_id,
                client_id,
                transport,
            } => {
                let runtime = match &self.runtime {
                    Some(runtime) => runtime.clone(),
                    None => Handle::try_current().map_err(|_| {
                        ExecError::Config("remote blocks need a tokio runtime".to_string())
                    })?,
                };
                Ok(ExecutionBlock::Remote(RemoteBlock::new(
                    ctx, transport, query_id, client_id, runtime,
                )))
            }

            PlanNode::ScatterClient {
                scatter,
                client_id,
                infos,
            } => Ok(ExecutionBlock::ScatterClient(ExecutionBlockImpl::new(
                IdExecutor::new(),
                Fetcher::Scatter(scatter.client(&client_id)?),
                infos,
                ctx,
            )?)),

            PlanNode::DistributeConsumer {
                scatter,
                distribute_id,
                infos,
            } => {
                if !matches!(scatter.mode(), ScatterMode::Distribute { .. }) {
                    return Err(ExecError::InvalidCall(format!(
                        "distribute consumer {} attached to a broadcasting scatter",
                        distribute_id
                    )));
                }
                let fetcher = Fetcher::Scatter(scatter.client(&distribute_id)?);
                Ok(ExecutionBlock::DistributeConsumer(ExecutionBlockImpl::new(
                    IdExecutor::with_distribute_id(distribute_id),
                    fetcher,
                    infos,
                    ctx,
                )?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::demand::{Call, DemandStack};
    use crate::engine::ExecutionState;
    use crate::executor::enumerate::ArrayProvider;

    fn ctx() -> Arc<QueryContext> {
        QueryContext::new(1, EngineConfig::default()).unwrap()
    }

    fn list(values: &[i64]) -> RowBlock {
        let array = Value::Array(values.iter().map(|v| Value::Int(*v)).collect());
        RowBlock::from_rows(1, vec![vec![array]]).unwrap()
    }

    #[test]
    fn test_build_enumerate_filter() {
        let ctx = ctx();
        let plan = PlanNode::Filter {
            infos: RegisterInfos::passthrough(2),
            condition: ExpressionRef::from_fn(|row| {
                Ok(Value::Bool(row.value(1)?.as_int().unwrap_or(0) > 2))
            }),
            input: Box::new(PlanNode::Enumerate {
                infos: RegisterInfos::with_output(1),
                provider: Arc::new(ArrayProvider::new(0)),
                output_register: 1,
                input: Box::new(PlanNode::Singleton {
                    infos: RegisterInfos::passthrough(1),
                    input: Some(list(&[1, 2, 3, 4, 5])),
                }),
            }),
        };
        let mut engine = EngineBuilder::new(Arc::clone(&ctx)).build(plan).unwrap();

        let result = engine.execute(DemandStack::new(Call::new())).unwrap();
        assert_eq!(result.state, ExecutionState::Done);
        let block = result.rows().unwrap();
        let values: Vec<i64> = (0..block.len())
            .map(|i| block.value(i, 1).unwrap().as_int().unwrap())
            .collect();
        assert_eq!(values, vec![3, 4, 5]);
        assert_eq!(ctx.stats().scanned, 5);
        assert_eq!(ctx.stats().filtered, 2);
    }

    #[test]
    fn test_invalid_register_plan_fails_build() {
        let mut infos = RegisterInfos::passthrough(1);
        infos.registers_to_keep = vec![3];
        let plan = PlanNode::Singleton { infos, input: None };
        let err = EngineBuilder::new(ctx()).build(plan).err().unwrap();
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_calculation_requires_in_place_layout() {
        let plan = PlanNode::Calculation {
            infos: RegisterInfos::with_output(1),
            expression: ExpressionRef::constant(Value::Int(1)),
            output_register: 1,
            input: Box::new(PlanNode::Singleton {
                infos: RegisterInfos::passthrough(1),
                input: None,
            }),
        };
        assert!(EngineBuilder::new(ctx()).build(plan).is_err());
    }
}
