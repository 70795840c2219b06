use ni2c::{
    sim::{Memory, SimBus},
    Access, Ni2cFile,
};

pub const EEPROM: u8 = 0x50;

pub fn trace_init() {
    use tracing_subscriber::filter::{EnvFilter, LevelFilter};
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse_lossy("ni2c=debug")
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A bus with a 256-byte memory at [`EEPROM`], and that memory.
#[allow(dead_code)]
pub fn eeprom_bus() -> (SimBus, Memory) {
    trace_init();
    let mem = Memory::new(256);
    let bus = SimBus::default().with_target(EEPROM, mem.clone());
    (bus, mem)
}

#[allow(dead_code)]
pub fn open(bus: &SimBus) -> Ni2cFile<SimBus> {
    Ni2cFile::open_with(bus.clone(), SimBus::DEFAULT_NAME, Access::ReadWrite)
        .expect("device should open")
}
