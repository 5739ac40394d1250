use clap::Args;
use freefall_error::GenericError;

use crate::config::FreefallConfiguration;

/// Prints the gravity table.
#[derive(Args, Debug)]
pub struct BodiesCommand {}

/// Entrypoint for the `bodies` command.
pub fn handle_bodies_command(config: &FreefallConfiguration, _cmd: BodiesCommand) -> Result<(), GenericError> {
    let table = config.gravity_table()?;
    for (body, acceleration) in table.bodies() {
        println!("{:<12} {} m/s²", body, acceleration);
    }
    Ok(())
}
