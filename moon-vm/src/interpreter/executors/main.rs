//! The outer run loop: safe points, error unwinding, and loop exits.

use crate::error::RuntimeError;
use crate::heap::Gc;
use crate::interpreter::Interpreter;
use crate::meta::MetaEvent;
use crate::state::{ExecuteState, LoopExit};
use crate::table::Table;
use crate::thread::Thread;
use crate::value::Value;

impl Interpreter {
    /// Run the dispatch loop until the frame chain drops back to `floor`
    /// or the thread suspends. `allow_yield` is true only for the span
    /// entered by a `resume`.
    pub(crate) fn execute_frames(
        &mut self,
        th: Gc<Thread>,
        floor: usize,
        allow_yield: bool,
    ) -> Result<LoopExit, RuntimeError> {
        let saved = self.yieldable;
        self.yieldable = allow_yield;
        let result = self.run_loop(th, floor);
        self.yieldable = saved;
        result
    }

    fn run_loop(&mut self, th: Gc<Thread>, floor: usize) -> Result<LoopExit, RuntimeError> {
        loop {
            let result = self.safe_point(th).and_then(|_| self.step(th));
            match result {
                Ok(ExecuteState::Yielded) => return Ok(LoopExit::Yielded),
                Ok(state) => {
                    debug_assert!(state.should_continue());
                    if self.heap.thread(th).frames.len() <= floor {
                        return Ok(LoopExit::Returned);
                    }
                }
                Err(err) => {
                    self.record_location(th);
                    self.unwind(th, floor, err)?;
                    if self.heap.thread(th).frames.len() <= floor {
                        return Ok(LoopExit::Returned);
                    }
                }
            }
        }
    }

    /// Between instructions: collection, one queued finalizer, and the
    /// host hook.
    fn safe_point(&mut self, th: Gc<Thread>) -> Result<(), RuntimeError> {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        if let Some(target) = self.heap.next_finalizer() {
            self.run_finalizer(th, target);
        }
        if let Some((period, hook)) = self.hook {
            self.hook_countdown = self.hook_countdown.saturating_sub(1);
            if self.hook_countdown == 0 {
                self.hook_countdown = period;
                hook(self, th)?;
            }
        }
        Ok(())
    }

    /// Call a queued `__gc` finalizer; errors are reported, never
    /// propagated.
    pub(crate) fn run_finalizer(&mut self, th: Gc<Thread>, target: Gc<Table>) {
        let value = Value::Table(target);
        let Some(mm) = self.metamethod(value, MetaEvent::Gc) else {
            return;
        };
        if let Err(err) = self.call_meta(th, mm, &[value], 0) {
            let rendered = {
                let v = self.error_value(&err);
                self.display_value(v)
            };
            tracing::warn!(
                target: "moon_vm::gc",
                error = %rendered,
                "error in __gc finalizer"
            );
        }
    }
}
