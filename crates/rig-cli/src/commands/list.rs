//! `rig list` - tabulate deployed rigs.

use rig_core::control::client;

pub fn run() -> i32 {
    let rigs = match client::discover() {
        Ok(rigs) => rigs,
        Err(e) => {
            eprintln!("cannot enumerate rigs: {e}");
            return 1;
        }
    };

    println!(
        "{:<12} {:>8} {:<20} {:>8}  {}",
        "NAME", "PID", "PHASE", "UPTIME", "MONITORS"
    );
    for rig in &rigs {
        match &rig.status {
            Some(status) => {
                let monitors: Vec<String> = status
                    .monitors
                    .iter()
                    .map(|m| format!("{} ({})", m.name, m.state))
                    .collect();
                println!(
                    "{:<12} {:>8} {:<20} {:>7}s  {}",
                    status.name,
                    status.pid,
                    status.phase,
                    status.uptime_s,
                    monitors.join(", ")
                );
            }
            None => {
                println!("{:<12} {:>8} {:<20} {:>8}  ", rig.name, "-", "stale", "-");
            }
        }
    }
    // An empty host is not an error.
    0
}
