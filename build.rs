use std::process::Command;

fn main() {
    // Release pipelines pin the version through ORADOCK_PROVISION_VERSION;
    // local builds describe the working tree instead.
    if let Ok(version) = std::env::var("ORADOCK_PROVISION_VERSION") {
        println!("cargo:rustc-env=ORADOCK_PROVISION_VERSION={version}");
    } else if let Ok(output) = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        && output.status.success()
    {
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=ORADOCK_PROVISION_VERSION={version}");
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-env-changed=ORADOCK_PROVISION_VERSION");
}
