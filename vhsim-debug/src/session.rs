//! The debug session state machine (C8): breakpoints, watchpoints, the
//! halt flag, and the `step`/`run` execution loop built on top of a
//! shared [`Board`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use vhsim_core::{Board, Error, Result};

/// Which access direction(s) trigger a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchAccess {
    Read,
    Write,
    Access,
}

impl WatchAccess {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(WatchAccess::Read),
            "write" => Ok(WatchAccess::Write),
            "access" => Ok(WatchAccess::Access),
            other => Err(Error::Protocol(format!(
                "invalid watchpoint access kind '{other}'"
            ))),
        }
    }

    fn matches(&self, is_write: bool) -> bool {
        match self {
            WatchAccess::Read => !is_write,
            WatchAccess::Write => is_write,
            WatchAccess::Access => true,
        }
    }
}

struct Watchpoint {
    id: u64,
    address: u32,
    size: u32,
    access: WatchAccess,
}

impl Watchpoint {
    fn end(&self) -> u32 {
        self.address.saturating_add(self.size)
    }
}

/// Tagged stop reason reported by `step` and `run`, per the debug
/// protocol's precise stop semantics.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Step { pc: u32 },
    Breakpoint { address: u32 },
    Watchpoint { watch_id: u64, address: u32 },
    Halt,
    Fault { address: u32, detail: String },
    Limit,
}

/// Everything a connected debugger can mutate, shared across every
/// connection attached to one board: breakpoints and watchpoints are
/// CPU-owned sets, and the halt flag is a single cancellation channel
/// any connection can raise to stop a `run` in progress on another.
pub struct DebugSession {
    board: Mutex<Board>,
    breakpoints: Mutex<HashSet<u32>>,
    watchpoints: Mutex<Vec<Watchpoint>>,
    next_watch_id: AtomicU64,
    halt_requested: AtomicBool,
}

impl DebugSession {
    pub fn new(board: Board) -> Self {
        Self {
            board: Mutex::new(board),
            breakpoints: Mutex::new(HashSet::new()),
            watchpoints: Mutex::new(Vec::new()),
            next_watch_id: AtomicU64::new(1),
            halt_requested: AtomicBool::new(false),
        }
    }

    pub fn board_name(&self) -> String {
        self.board.lock().name().to_string()
    }

    pub fn reset(&self) -> Result<()> {
        self.board.lock().reset()
    }

    pub fn read_mem(&self, address: u32, size: u32) -> Result<Vec<u8>> {
        self.board.lock().debug_read_mem(address, size)
    }

    pub fn write_mem(&self, address: u32, data: &[u8]) -> Result<()> {
        self.board.lock().debug_write_mem(address, data)
    }

    pub fn read_reg(&self, index: u8) -> Result<u32> {
        self.board.lock().cpu().read_reg(index)
    }

    pub fn write_reg(&self, index: u8, value: u32) -> Result<()> {
        self.board.lock().cpu_mut().write_reg(index, value)
    }

    pub fn set_breakpoint(&self, address: u32) {
        self.breakpoints.lock().insert(address);
    }

    pub fn clear_breakpoint(&self, address: u32) -> bool {
        self.breakpoints.lock().remove(&address)
    }

    pub fn set_watchpoint(&self, address: u32, size: u32, access: WatchAccess) -> u64 {
        let id = self.next_watch_id.fetch_add(1, Ordering::SeqCst);
        self.watchpoints.lock().push(Watchpoint {
            id,
            address,
            size,
            access,
        });
        id
    }

    pub fn clear_watchpoint(&self, watch_id: u64) -> bool {
        let mut watchpoints = self.watchpoints.lock();
        let before = watchpoints.len();
        watchpoints.retain(|w| w.id != watch_id);
        watchpoints.len() != before
    }

    /// Sets the halt-requested flag; a concurrent `run` observes it at
    /// its next iteration boundary and stops cleanly.
    pub fn request_halt(&self) {
        self.halt_requested.store(true, Ordering::SeqCst);
    }

    fn is_breakpoint(&self, pc: u32) -> bool {
        self.breakpoints.lock().contains(&pc)
    }

    /// Drains the most recent trapped MMIO access and, if it matches a
    /// registered watchpoint, returns that watchpoint's id and the
    /// triggering address. One hit is consumed per call.
    fn consume_watch_hit(&self, board: &mut Board) -> Option<(u64, u32)> {
        let trap = board.cpu().take_last_trap()?;
        let trap_end = trap.address.saturating_add(trap.size as u32);
        self.watchpoints.lock().iter().find_map(|w| {
            let overlaps = trap.address < w.end() && trap_end > w.address;
            if overlaps && w.access.matches(trap.is_write) {
                Some((w.id, trap.address))
            } else {
                None
            }
        })
    }

    /// Executes exactly one instruction. A breakpoint at the current
    /// PC is checked before executing, so stepping onto a breakpoint
    /// never runs the instruction there.
    pub fn step(&self) -> Result<StopReason> {
        let mut board = self.board.lock();
        let pc = board.cpu().pc()?;
        if self.is_breakpoint(pc) {
            return Ok(StopReason::Breakpoint { address: pc });
        }
        if let Err(e) = board.cpu_mut().step() {
            if !e.is_target_fault() {
                return Err(e);
            }
            return Ok(StopReason::Fault {
                address: pc,
                detail: e.to_string(),
            });
        }
        if let Some((watch_id, address)) = self.consume_watch_hit(&mut board) {
            return Ok(StopReason::Watchpoint { watch_id, address });
        }
        let new_pc = board.cpu().pc()?;
        Ok(StopReason::Step { pc: new_pc })
    }

    /// Executes instructions until a breakpoint, watchpoint, halt
    /// request, engine fault, or `max_steps` is reached. `max_steps =
    /// Some(0)` executes nothing and reports `limit` immediately.
    pub fn run(&self, max_steps: Option<u64>) -> Result<StopReason> {
        if max_steps == Some(0) {
            return Ok(StopReason::Limit);
        }
        self.halt_requested.store(false, Ordering::SeqCst);
        let mut steps = 0u64;
        loop {
            let mut board = self.board.lock();

            if self.halt_requested.swap(false, Ordering::SeqCst) {
                return Ok(StopReason::Halt);
            }

            let pc = board.cpu().pc()?;
            if self.is_breakpoint(pc) {
                return Ok(StopReason::Breakpoint { address: pc });
            }

            if let Err(e) = board.cpu_mut().step() {
                if !e.is_target_fault() {
                    return Err(e);
                }
                return Ok(StopReason::Fault {
                    address: pc,
                    detail: e.to_string(),
                });
            }

            if let Some((watch_id, address)) = self.consume_watch_hit(&mut board) {
                return Ok(StopReason::Watchpoint { watch_id, address });
            }

            let new_pc = board.cpu().pc()?;
            if self.is_breakpoint(new_pc) {
                return Ok(StopReason::Breakpoint { address: new_pc });
            }

            steps += 1;
            if let Some(max) = max_steps {
                if steps >= max {
                    return Ok(StopReason::Limit);
                }
            }
            // `board` is dropped here at the end of the loop body,
            // releasing the mutex between iterations for fairness with
            // other connections and a pending `halt`.
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vhsim_core::default_registry;

    fn test_session() -> DebugSession {
        let registry = default_registry().unwrap();
        let mut board = registry.create("tm4c123", None).unwrap();
        let mut image = vec![0u8; 0x100];
        image[0..4].copy_from_slice(&0x2000_1000u32.to_le_bytes());
        image[4..8].copy_from_slice(&0x0000_0101u32.to_le_bytes());
        board.load_firmware(&image).unwrap();
        DebugSession::new(board)
    }

    #[test]
    fn breakpoint_stops_before_executing() {
        let session = test_session();
        let pc = session.read_reg(15).unwrap();
        session.set_breakpoint(pc);

        let reason = session.run(Some(10)).unwrap();
        assert!(matches!(reason, StopReason::Breakpoint { address } if address == pc));
        assert_eq!(session.read_reg(15).unwrap(), pc);
    }

    #[test]
    fn run_with_zero_max_steps_is_immediate_limit() {
        let session = test_session();
        let reason = session.run(Some(0)).unwrap();
        assert!(matches!(reason, StopReason::Limit));
    }

    #[test]
    fn clear_watchpoint_reports_removal() {
        let session = test_session();
        let id = session.set_watchpoint(0x2000_0000, 4, WatchAccess::Write);
        assert!(session.clear_watchpoint(id));
        assert!(!session.clear_watchpoint(id));
    }

    #[test]
    fn clear_unknown_breakpoint_reports_false() {
        let session = test_session();
        assert!(!session.clear_breakpoint(0x0800_0100));
    }
}
