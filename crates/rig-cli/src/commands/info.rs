//! `rig info` - detailed status of one rig.

use rig_core::control::client;

pub fn run(id: &str) -> i32 {
    match client::status(id) {
        Ok(status) => {
            match serde_json::to_string_pretty(&status) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => {
                    eprintln!("cannot render status: {e}");
                    return 1;
                }
            }
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}
