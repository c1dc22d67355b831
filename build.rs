fn main() {
    // Build scripts run on the host, so check the TARGET env var and only
    // pull in the ESP-IDF environment for `*-espidf` targets (Xtensa and RISC-V)
    if let Ok(target) = std::env::var("TARGET") {
        if target.ends_with("-espidf") {
            embuild::espidf::sysenv::output();
        }
    }
}
