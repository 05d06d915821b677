pub mod common;
pub mod mariadb_e2e;

use common::Error;
use mariadb_e2e::{mariadb_e2e_test, mariadb_recovery_e2e_test, mariadb_scaling_e2e_test};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).cloned().unwrap_or_default();
    match cmd.as_str() {
        "mariadb" => {
            println!("Running mariadb end-to-end test");
            mariadb_e2e_test().await
        }
        "mariadb-scaling" => {
            println!("Running mariadb end-to-end test for scaling");
            mariadb_scaling_e2e_test().await
        }
        "mariadb-recovery" => {
            println!("Running mariadb end-to-end test for quorum loss recovery");
            mariadb_recovery_e2e_test().await
        }
        _ => {
            println!("Please specify one test: mariadb, mariadb-scaling or mariadb-recovery");
            Ok(())
        }
    }
}
