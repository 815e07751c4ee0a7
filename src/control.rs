/// Control over the stopped thread selected for call injection.
///
/// The executor of a compiled program drives the injection protocol through
/// this interface: it rewrites registers and the stack so the inferior runs
/// the chosen function, resumes until the return trap, then restores the
/// thread exactly as it was. The evaluator itself never schedules anything.
pub trait StoppedThreadControl {
    fn read_register(&mut self, index: usize) -> anyhow::Result<u64>;

    fn write_register(&mut self, index: usize, value: u64) -> anyhow::Result<()>;

    /// Resume the thread until it reaches `pc`.
    fn run_until(&mut self, pc: u64) -> anyhow::Result<()>;

    /// Restore the register and stack state saved before the injection.
    fn restore(&mut self) -> anyhow::Result<()>;
}
