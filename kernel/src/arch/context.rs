//! Architecture-independent context management interface
//!
//! [`CpuContext`] is the opaque register blob stored in every TCB. The
//! [`ContextHal`] trait is the only code path that moves register state
//! between the CPU and a TCB.

use crate::mm::PhysicalAddress;

/// Number of general purpose register slots in a saved context
pub const GPR_COUNT: usize = 16;

/// Register slot carrying the first entry-point argument
pub const ARG0_REGISTER: usize = 0;

/// Interrupts-enabled bit set in the flags word of fresh contexts
pub const FLAG_INTERRUPTS_ENABLED: u64 = 0x200;

/// Saved CPU register state of one thread
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuContext {
    /// General purpose registers
    pub gprs: [u64; GPR_COUNT],
    /// Stack pointer
    pub sp: u64,
    /// Instruction pointer
    pub ip: u64,
    /// CPU flags
    pub flags: u64,
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl CpuContext {
    /// Create an all-zero context
    pub const fn empty() -> Self {
        Self {
            gprs: [0; GPR_COUNT],
            sp: 0,
            ip: 0,
            flags: 0,
        }
    }

    /// Initialize context for a new thread.
    ///
    /// Resuming it begins executing `entry(arg)` with the stack pointer at
    /// the top of the stack, less one slot for a fake return address.
    pub fn new_thread(entry_point: usize, arg: usize, stack_top: usize) -> Self {
        let mut ctx = Self::empty();
        ctx.ip = entry_point as u64;
        ctx.sp = (stack_top as u64).saturating_sub(8);
        ctx.gprs[ARG0_REGISTER] = arg as u64;
        ctx.flags = FLAG_INTERRUPTS_ENABLED;
        ctx
    }

    pub fn instruction_pointer(&self) -> usize {
        self.ip as usize
    }

    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }

    pub fn set_return_value(&mut self, value: usize) {
        self.gprs[ARG0_REGISTER] = value as u64;
    }
}

/// Hardware hooks used by the context switch primitive.
///
/// Implementations run with interrupts disabled and must not block.
pub trait ContextHal {
    /// Copy the live CPU registers into `ctx`
    fn save(&mut self, ctx: &mut CpuContext);

    /// Load `ctx` into the CPU registers
    fn restore(&mut self, ctx: &CpuContext);

    /// Install the address space rooted at `root`
    fn switch_address_space(&mut self, root: PhysicalAddress);
}

/// Software register file.
///
/// Stands in for the CPU on hosted builds: `save` snapshots the live
/// registers, `restore` overwrites them, and address space installs are
/// recorded.
#[derive(Debug, Default)]
pub struct SoftContext {
    live: CpuContext,
    active_root: Option<PhysicalAddress>,
    address_space_switches: u64,
    saves: u64,
    restores: u64,
}

impl SoftContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers currently loaded on the simulated CPU
    pub fn live(&self) -> &CpuContext {
        &self.live
    }

    /// Mutable access to the live registers, standing in for execution
    pub fn live_mut(&mut self) -> &mut CpuContext {
        &mut self.live
    }

    pub fn active_root(&self) -> Option<PhysicalAddress> {
        self.active_root
    }

    pub fn address_space_switches(&self) -> u64 {
        self.address_space_switches
    }

    pub fn saves(&self) -> u64 {
        self.saves
    }

    pub fn restores(&self) -> u64 {
        self.restores
    }
}

impl ContextHal for SoftContext {
    fn save(&mut self, ctx: &mut CpuContext) {
        *ctx = self.live;
        self.saves += 1;
    }

    fn restore(&mut self, ctx: &CpuContext) {
        self.live = *ctx;
        self.restores += 1;
    }

    fn switch_address_space(&mut self, root: PhysicalAddress) {
        self.active_root = Some(root);
        self.address_space_switches += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread_context() {
        let ctx = CpuContext::new_thread(0x40_1000, 7, 0x50_0000);
        assert_eq!(ctx.instruction_pointer(), 0x40_1000);
        assert_eq!(ctx.stack_pointer(), 0x50_0000 - 8);
        assert_eq!(ctx.gprs[ARG0_REGISTER], 7);
        assert_ne!(ctx.flags & FLAG_INTERRUPTS_ENABLED, 0);
    }

    #[test]
    fn test_soft_context_save_restore() {
        let mut hal = SoftContext::new();
        hal.live_mut().gprs[3] = 0xdead;

        let mut saved = CpuContext::empty();
        hal.save(&mut saved);
        assert_eq!(saved.gprs[3], 0xdead);

        let other = CpuContext::new_thread(0x1000, 0, 0x2000);
        hal.restore(&other);
        assert_eq!(*hal.live(), other);
        assert_eq!(hal.saves(), 1);
        assert_eq!(hal.restores(), 1);
    }
}
