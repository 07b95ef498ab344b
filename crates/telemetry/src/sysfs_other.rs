//! Stub readers for platforms without procfs.

pub fn read_cpu_times() -> (u64, u64) {
    (0, 0)
}
pub fn read_cpu_temp() -> Option<f64> {
    None
}
pub fn read_mem_info() -> Option<(u64, u64)> {
    None
}
