use argh::FromArgs;
use std::path::PathBuf;

#[derive(FromArgs, Debug)]
/// Optional command line arguments
pub struct TopLevelCmd {
    /// specify config file path, creates file if it doesn't exist
    #[argh(option, short = 'c')]
    pub config_override: Option<PathBuf>,
    /// config file must exist, including "config_override" files
    #[argh(switch, short = 'r')]
    pub config_required: bool,
    /// use config file as-is (don't save over it)
    #[argh(switch, short = 'n')]
    pub no_save: bool,
    #[argh(subcommand)]
    pub subcommands: Option<SubCommands>,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum SubCommands {
    Ble(BleCmd),
    Dummy(DummyCmd),
    Forget(ForgetCmd),
}

/// connect to BLE heart rate and cycling power sensors (default)
#[derive(FromArgs, Debug, Default)]
#[argh(subcommand, name = "ble")]
pub struct BleCmd {
    /// identifier of the heart rate monitor to connect to
    #[argh(option)]
    pub hr_device: Option<String>,
    /// identifier of the power meter to connect to
    #[argh(option)]
    pub power_device: Option<String>,
}

/// stream simulated heart rate, power and cadence data
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "dummy")]
pub struct DummyCmd {}

/// forget saved sensors so they aren't reconnected automatically
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "forget")]
pub struct ForgetCmd {
    /// which saved sensor to forget: hr, power, or all (default)
    #[argh(option, short = 's')]
    pub sensor: Option<String>,
}
