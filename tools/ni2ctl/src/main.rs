use clap::{Parser, Subcommand, ValueEnum};
use miette::WrapErr;
use ni2c::{
    sim::{Memory, SimBus},
    Access, DeviceControl, ErrorCode, Ni2cFile, Transmission,
};
use std::{fmt, str::FromStr};
use tracing::level_filters::LevelFilter;

/// Address of the memory device on the simulated bus.
const SIM_EEPROM: u8 = 0x50;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// the NI2C device node to open.
    #[arg(short, long, global = true, env = "NI2C_DEVICE", default_value = SimBus::DEFAULT_NAME)]
    device: String,

    /// access requested when opening the device.
    #[arg(short, long, global = true, value_enum, default_value_t = AccessArg::ReadWrite)]
    access: AccessArg,

    /// run against the simulated driver, with a 256-byte memory device at
    /// address 0x50.
    ///
    /// this is always the case on hosts without the native driver.
    #[arg(long, global = true)]
    sim: bool,

    /// report failures as bare platform error codes, and exit with the code.
    #[arg(long, global = true)]
    return_codes: bool,

    /// a comma-separated list of `tracing` targets and levels to enable.
    ///
    /// for example, `info,ni2c=trace` enables the `INFO` level globally and
    /// every level for the `ni2c` crate, including the raw control calls.
    ///
    /// see <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/targets/struct.Targets.html#filtering-with-targets>
    /// for more details on this syntax.
    #[arg(
        short,
        long = "trace",
        global = true,
        env = "NI2C_TRACE",
        default_value_t = tracing_subscriber::filter::Targets::new().with_default(LevelFilter::WARN),
    )]
    trace_filter: tracing_subscriber::filter::Targets,
}

#[derive(Subcommand)]
enum Command {
    /// print the bus clock frequency.
    Clock,
    /// print whether a result is available.
    Check,
    /// discard the next result.
    Skip,
    /// run one transmission request and print the result of every message.
    Xfer {
        /// messages, in bus order: `w:ADDR:HEX` writes the hex bytes,
        /// `r:ADDR:LEN` reads LEN bytes, `ra:ADDR:LEN` reads LEN bytes and
        /// acknowledges the last one.
        #[arg(required = true, value_name = "MSG")]
        msgs: Vec<MsgArg>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AccessArg {
    Query,
    Read,
    Write,
    ReadWrite,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum MsgArg {
    Write { addr: u8, bytes: Vec<u8> },
    Read { addr: u8, len: usize, ack: bool },
}

fn main() -> miette::Result<()> {
    use tracing_subscriber::prelude::*;

    let args = Args::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().without_time())
        .with(args.trace_filter.clone())
        .init();

    let failed = if args.sim {
        run(sim_bus(&args.device), &args)?
    } else {
        run_native(&args)?
    };
    if let Some(code) = failed {
        std::process::exit(code.raw() as i32);
    }
    Ok(())
}

#[cfg(windows)]
fn run_native(args: &Args) -> miette::Result<Option<ErrorCode>> {
    run(ni2c::win32::Win32, args)
}

#[cfg(not(windows))]
fn run_native(args: &Args) -> miette::Result<Option<ErrorCode>> {
    tracing::info!("no native NI2C driver on this host, using the simulated bus");
    run(sim_bus(&args.device), args)
}

fn sim_bus(device: &str) -> SimBus {
    let contents = (0..=255).collect::<Vec<u8>>();
    SimBus::new(device).with_target(SIM_EEPROM, Memory::with_contents(contents))
}

/// Runs the command. In `--return-codes` mode, a failed operation is
/// returned as its code rather than as an error.
fn run<D: DeviceControl>(driver: D, args: &Args) -> miette::Result<Option<ErrorCode>> {
    let file = Ni2cFile::open_with(driver, &args.device, args.access.into())?;
    tracing::debug!(?file, "opened");

    if args.return_codes {
        let file = file.report_codes();
        let result = match &args.cmd {
            Command::Clock => file.get_clock_frequency().map(|hz| println!("{hz}")),
            Command::Check => file.check_result().map(|ready| println!("{ready}")),
            Command::Skip => file.skip_result(),
            Command::Xfer { msgs } => {
                let mut txn = build(msgs)?;
                file.schedule_transmission(&txn)
                    .and_then(|()| file.get_transmission(&mut txn))
                    .map(|()| print_results(&txn))
            }
        };
        return Ok(result.err().map(|code| {
            eprintln!("{code}");
            code
        }));
    }

    match &args.cmd {
        Command::Clock => println!("{} Hz", file.get_clock_frequency()?),
        Command::Check => {
            if file.check_result()? {
                println!("a result is available");
            } else {
                println!("no result available");
            }
        }
        Command::Skip => {
            file.skip_result()?;
            println!("result skipped");
        }
        Command::Xfer { msgs } => {
            let mut txn = build(msgs)?;
            file.schedule_transmission(&txn)?;
            file.get_transmission(&mut txn)?;
            print_results(&txn);
            txn.check().wrap_err("transmission failed on the bus")?;
        }
    }
    Ok(None)
}

fn build(msgs: &[MsgArg]) -> miette::Result<Transmission> {
    let mut txn = Transmission::new();
    for msg in msgs {
        let pushed = match *msg {
            MsgArg::Write { addr, ref bytes } => txn.write(addr, bytes),
            MsgArg::Read { addr, len, ack: false } => txn.read(addr, len),
            MsgArg::Read { addr, len, ack: true } => txn.read_ack(addr, len),
        };
        pushed.wrap_err_with(|| format!("invalid message `{msg}`"))?;
    }
    Ok(txn)
}

fn print_results(txn: &Transmission) {
    for (i, msg) in txn.messages().enumerate() {
        let dir = if msg.is_read() { "r" } else { "w" };
        let hex = msg
            .bytes
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        println!(
            "#{i} {dir} {:#04x} [{}] {:?} {hex}",
            msg.header.address(),
            msg.header.len,
            msg.header.flags
        );
    }
}

// === impl AccessArg ===

impl From<AccessArg> for Access {
    fn from(access: AccessArg) -> Self {
        match access {
            AccessArg::Query => Access::Query,
            AccessArg::Read => Access::Read,
            AccessArg::Write => Access::Write,
            AccessArg::ReadWrite => Access::ReadWrite,
        }
    }
}

// === impl MsgArg ===

impl FromStr for MsgArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(addr), Some(arg)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!(
                "expected `w:ADDR:HEX`, `r:ADDR:LEN` or `ra:ADDR:LEN`, got `{s}`"
            ));
        };
        let addr = parse_int::<u8>(addr).map_err(|e| format!("invalid address `{addr}`: {e}"))?;
        match kind {
            "w" => Ok(Self::Write {
                addr,
                bytes: parse_hex(arg)?,
            }),
            "r" | "ra" => Ok(Self::Read {
                addr,
                len: parse_int(arg).map_err(|e| format!("invalid length `{arg}`: {e}"))?,
                ack: kind == "ra",
            }),
            _ => Err(format!("unknown message kind `{kind}`, expected `w`, `r` or `ra`")),
        }
    }
}

impl fmt::Display for MsgArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write { addr, bytes } => {
                write!(f, "w:{addr:#04x}:")?;
                bytes.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
            }
            Self::Read { addr, len, ack } => {
                let kind = if *ack { "ra" } else { "r" };
                write!(f, "{kind}:{addr:#04x}:{len}")
            }
        }
    }
}

fn parse_int<T>(s: &str) -> Result<T, std::num::ParseIntError>
where
    T: FromStr<Err = std::num::ParseIntError> + TryFrom<u64>,
{
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => {
            let value = u64::from_str_radix(hex, 16)?;
            // out of range: let the decimal parser produce the error
            T::try_from(value).or_else(|_| T::from_str(&value.to_string()))
        }
        None => s.parse(),
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    if !s.is_ascii() || s.len() % 2 != 0 {
        return Err(format!("`{s}` is not a sequence of hex byte pairs"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            let pair = &s[i..i + 2];
            u8::from_str_radix(pair, 16).map_err(|e| format!("invalid hex byte `{pair}`: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_message_args() {
        assert_eq!(
            "w:0x50:10dead".parse::<MsgArg>(),
            Ok(MsgArg::Write {
                addr: 0x50,
                bytes: vec![0x10, 0xde, 0xad]
            })
        );
        assert_eq!(
            "ra:80:4".parse::<MsgArg>(),
            Ok(MsgArg::Read {
                addr: 0x50,
                len: 4,
                ack: true
            })
        );
        assert_eq!(
            "w:0x20:".parse::<MsgArg>(),
            Ok(MsgArg::Write {
                addr: 0x20,
                bytes: Vec::new()
            })
        );
        assert!("x:0x50:1".parse::<MsgArg>().is_err());
        assert!("r:0x50".parse::<MsgArg>().is_err());
        assert!("r:0x150:1".parse::<MsgArg>().is_err());
        assert!("w:0x50:abc".parse::<MsgArg>().is_err());
    }

    #[test]
    fn message_args_display_like_they_parse() {
        for arg in ["w:0x50:10dead", "r:0x50:4", "ra:0x21:2"] {
            assert_eq!(arg.parse::<MsgArg>().unwrap().to_string(), arg);
        }
    }

    #[test]
    fn xfer_against_the_simulated_bus() {
        let args = Args::parse_from([
            "ni2ctl", "--sim", "xfer", "w:0x50:10", "r:0x50:4",
        ]);
        assert!(matches!(args.cmd, Command::Xfer { ref msgs } if msgs.len() == 2));
        assert_eq!(run(sim_bus(&args.device), &args).unwrap(), None);

        let args = Args::parse_from(["ni2ctl", "--sim", "--return-codes", "skip"]);
        assert_eq!(
            run(sim_bus(&args.device), &args).unwrap(),
            Some(ErrorCode::NOT_READY)
        );
    }
}
