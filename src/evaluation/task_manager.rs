// =============================================================================
// Evaluator Task Manager — evaluation cycle of one (symbol, time frame)
// =============================================================================
//
// Notifications arrive through the exchange's Evaluation channel and are
// processed one at a time by this task's consumer. Acceptance:
//   - interruption: only once every time frame of the symbol is initialised
//   - otherwise:    once every time frame is initialised, or when it is the
//                   task's very first notification
// An accepted cycle optionally force-refreshes the candles (without
// publishing them on the OHLCV channel, whose consumer waits on this one),
// recomputes the TA evaluators (except the one that triggered it, and none
// when the candles are stale), writes every note into
// the matrix, updates the strategies, optionally finalizes and optionally
// appends an export row.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::channels::channel::Channel;
use crate::channels::consumer::{callback, Consumer};
use crate::channels::routing::Subscription;
use crate::channels::topics::{EvaluationTopic, EvaluationTrigger, Message, OhlcvTopic, OhlcvUpdate};
use crate::evaluation::evaluator::{Notifier, SharedEvaluator};
use crate::evaluation::exporter::MatrixExporter;
use crate::evaluation::matrix::{EvalNote, EvaluatorKind};
use crate::evaluation::symbol_evaluator::SymbolEvaluator;
use crate::symbol_data::SymbolData;
use crate::types::TimeFrame;
use crate::updaters::OhlcvUpdater;

/// Source name used for notifications raised by candle refreshes.
pub const OHLCV_SOURCE: &str = "OHLCVUpdater";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Uninitialized,
    Active,
}

struct CycleState {
    state: TaskState,
    /// Consumed by the first accepted notification.
    first_notification: bool,
    eval_types_written: bool,
    cycles: u64,
}

pub struct EvaluatorTaskManager {
    exchange: String,
    time_frame: TimeFrame,
    symbol_data: Arc<SymbolData>,
    symbol_evaluator: Arc<SymbolEvaluator>,
    evaluators: Vec<SharedEvaluator>,
    notifier: Notifier,
    ohlcv_updater: Option<Arc<OhlcvUpdater>>,
    exporter: Option<Arc<MatrixExporter>>,
    candle_limit: Option<usize>,
    cycle: Mutex<CycleState>,
}

impl EvaluatorTaskManager {
    pub fn new(
        exchange: impl Into<String>,
        time_frame: TimeFrame,
        symbol_data: Arc<SymbolData>,
        symbol_evaluator: Arc<SymbolEvaluator>,
        evaluators: Vec<SharedEvaluator>,
        notifier: Notifier,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            time_frame,
            symbol_data,
            symbol_evaluator,
            evaluators,
            notifier,
            ohlcv_updater: None,
            exporter: None,
            candle_limit: None,
            cycle: Mutex::new(CycleState {
                state: TaskState::Uninitialized,
                first_notification: true,
                eval_types_written: false,
                cycles: 0,
            }),
        }
    }

    pub fn with_ohlcv_updater(mut self, updater: Arc<OhlcvUpdater>) -> Self {
        self.ohlcv_updater = Some(updater);
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<MatrixExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_candle_limit(mut self, limit: usize) -> Self {
        self.candle_limit = Some(limit);
        self
    }

    pub fn symbol(&self) -> &str {
        self.symbol_evaluator.symbol()
    }

    pub fn time_frame(&self) -> TimeFrame {
        self.time_frame
    }

    pub fn state(&self) -> TaskState {
        self.cycle.lock().state
    }

    pub fn cycles(&self) -> u64 {
        self.cycle.lock().cycles
    }

    /// Attach this task to its Evaluation channel queue and turn candle
    /// refreshes of its (symbol, time frame) into finalizing notifications.
    pub fn subscribe(
        self: &Arc<Self>,
        evaluation: &Channel<EvaluationTopic>,
        ohlcv: &Channel<OhlcvTopic>,
    ) -> (Arc<Consumer<EvaluationTrigger>>, Arc<Consumer<OhlcvUpdate>>) {
        let task = Arc::clone(self);
        let evaluation_consumer = evaluation.new_consumer(
            callback(move |message: Message<EvaluationTrigger>| {
                let task = Arc::clone(&task);
                async move {
                    task.process(&message.payload).await?;
                    Ok(())
                }
            }),
            Subscription::symbol(self.symbol()).time_frame(self.time_frame),
        );

        let notifier = self.notifier.clone();
        let ohlcv_consumer = ohlcv.new_consumer(
            callback(move |_message: Message<OhlcvUpdate>| {
                let notifier = notifier.clone();
                async move {
                    notifier
                        .notify(EvaluationTrigger::new(OHLCV_SOURCE).finalize())
                        .await;
                    Ok(())
                }
            }),
            Subscription::symbol(self.symbol()).time_frame(self.time_frame),
        );
        (evaluation_consumer, ohlcv_consumer)
    }

    /// Queue a notification for this task.
    pub async fn notify(&self, trigger_source: &str, force_refresh: bool, finalize: bool, interruption: bool) {
        let trigger = EvaluationTrigger {
            source: trigger_source.to_string(),
            force_refresh,
            finalize,
            interruption,
        };
        self.notifier.notify(trigger).await;
    }

    fn accept(&self, trigger: &EvaluationTrigger) -> bool {
        let all_initialized = self.symbol_evaluator.are_all_timeframes_initialized();
        let mut cycle = self.cycle.lock();
        let accepted = if trigger.interruption {
            all_initialized
        } else {
            all_initialized || cycle.first_notification
        };
        if accepted {
            cycle.first_notification = false;
            cycle.state = TaskState::Active;
        }
        accepted
    }

    /// Run one evaluation cycle if `trigger` is accepted. Returns whether the
    /// cycle ran.
    pub async fn process(&self, trigger: &EvaluationTrigger) -> anyhow::Result<bool> {
        if !self.accept(trigger) {
            debug!(
                symbol = %self.symbol(),
                time_frame = %self.time_frame,
                source = %trigger.source,
                interruption = trigger.interruption,
                "notification dropped, time frames not initialised"
            );
            return Ok(false);
        }

        if trigger.force_refresh {
            if let Some(updater) = &self.ohlcv_updater {
                // Not published: this consumer re-evaluates right below.
                if let Err(e) = updater.refresh_candles(self.time_frame, self.symbol()).await {
                    error!(symbol = %self.symbol(), time_frame = %self.time_frame, error = %e, "forced refresh failed");
                }
            }
        }

        self.refresh_matrix(&trigger.source);
        self.symbol_evaluator.update_strategies().await;
        if trigger.finalize {
            self.symbol_evaluator.finalize().await;
        }

        let cycles = {
            let mut cycle = self.cycle.lock();
            cycle.cycles += 1;
            cycle.cycles
        };

        if let Some(exporter) = &self.exporter {
            if self.symbol_evaluator.are_all_timeframes_initialized() {
                exporter
                    .save(self.symbol(), &self.symbol_evaluator.matrix().snapshot())
                    .with_context(|| format!("failed to export evaluations of {}", self.symbol()))?;
            }
        }

        debug!(
            exchange = %self.exchange,
            symbol = %self.symbol(),
            time_frame = %self.time_frame,
            source = %trigger.source,
            cycles,
            "evaluation cycle complete"
        );
        Ok(true)
    }

    /// Recompute TA evaluators and write every evaluator's note. Stale
    /// candles are not evaluated; the previous TA notes are kept.
    fn refresh_matrix(&self, ignored_evaluator: &str) {
        let candles = if self.symbol_data.ensure_data_validity(self.time_frame) {
            self.symbol_data.candle_snapshot(self.time_frame, self.candle_limit)
        } else {
            warn!(
                exchange = %self.exchange,
                symbol = %self.symbol(),
                time_frame = %self.time_frame,
                "stale candles, TA evaluators not recomputed"
            );
            None
        };
        let matrix = self.symbol_evaluator.matrix();
        let write_types = {
            let mut cycle = self.cycle.lock();
            !std::mem::replace(&mut cycle.eval_types_written, true)
        };

        for shared in &self.evaluators {
            let mut evaluator = shared.lock();
            let kind = evaluator.kind();

            if kind == EvaluatorKind::Ta && evaluator.is_active() && evaluator.name() != ignored_evaluator {
                if let Some(candles) = &candles {
                    if let Err(e) = evaluator.evaluate(candles) {
                        error!(
                            symbol = %self.symbol(),
                            evaluator = evaluator.name(),
                            error = %e,
                            "evaluator failed"
                        );
                    }
                }
            }

            evaluator.ensure_eval_note_is_not_expired();
            let note = if evaluator.is_active() {
                evaluator.eval_note()
            } else {
                EvalNote::Pending
            };
            let time_frame = (kind == EvaluatorKind::Ta).then_some(self.time_frame);
            matrix.set_eval(kind, evaluator.name(), note, time_frame);
            if write_types {
                matrix.set_evaluator_eval_type(evaluator.name(), evaluator.eval_type());
            }
        }

        if write_types {
            info!(
                exchange = %self.exchange,
                symbol = %self.symbol(),
                time_frame = %self.time_frame,
                evaluators = self.evaluators.len(),
                "evaluation task active"
            );
        }
    }
}
