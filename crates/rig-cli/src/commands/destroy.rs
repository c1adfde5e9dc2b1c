//! `rig destroy` - shut down deployed rig(s).
//!
//! Destroying `all` fans out over every discovered socket. Live rigs
//! get a `destroy` request; stale sockets are removed from disk only
//! under `--force`, since a dead-looking rig may just be wedged.

use rig_core::control::client::{self, ClientError};

pub fn run(id: &str, force: bool) -> i32 {
    if id == "all" {
        destroy_all(force)
    } else {
        match destroy_one(id, force) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("{e}");
                1
            }
        }
    }
}

fn destroy_one(name: &str, force: bool) -> Result<(), ClientError> {
    match client::destroy(name, force) {
        Ok(()) => {
            println!("{name} destroyed");
            Ok(())
        }
        Err(ClientError::Dead(_)) if force => {
            // Nothing listening: clean the leftover socket up ourselves.
            std::fs::remove_file(rig_core::paths::socket_path(name))?;
            println!("{name} was stale, socket removed");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn destroy_all(force: bool) -> i32 {
    let rigs = match client::discover() {
        Ok(rigs) => rigs,
        Err(e) => {
            eprintln!("cannot enumerate rigs: {e}");
            return 1;
        }
    };

    let mut failed = false;
    for rig in &rigs {
        if rig.is_live() {
            match client::destroy(&rig.name, force) {
                Ok(()) => println!("{} destroyed", rig.name),
                Err(e) => {
                    eprintln!("{}: {e}", rig.name);
                    failed = true;
                }
            }
        } else if force {
            match std::fs::remove_file(&rig.path) {
                Ok(()) => println!("{} was stale, socket removed", rig.name),
                Err(e) => {
                    eprintln!("{}: cannot remove stale socket: {e}", rig.name);
                    failed = true;
                }
            }
        } else {
            eprintln!("{}: not responding (use --force to clean up)", rig.name);
            failed = true;
        }
    }

    i32::from(failed)
}
