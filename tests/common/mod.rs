use std::path::PathBuf;

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

/// A DAQ line with all edge registers zeroed except those in `registers`, given as
/// `(field, value)` with field 1..=8.
pub fn daq_line(trigger_count: u32, registers: &[(usize, u8)], one_pps: u32, time: &str) -> String {
    let mut regs = [0u8; 8];
    for (field, value) in registers {
        regs[field - 1] = *value;
    }
    let regs: Vec<String> = regs.iter().map(|r| format!("{r:02X}")).collect();
    format!(
        "{trigger_count:08X} {} {one_pps:08X} {time} 181026 A 08 0 +0000",
        regs.join(" ")
    )
}
