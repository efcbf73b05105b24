//! Injects the station credentials from `.env` and sets up linking

fn main() {
    // Missing .env is fine: the logger then always hosts its own access point
    let _ = dotenvy::dotenv();
    println!("cargo:rerun-if-changed=.env");

    for key in ["WIFI_SSID", "WIFI_PASSWORD"] {
        let value = dotenvy::var(key).unwrap_or_default();
        println!("cargo:rerun-if-env-changed={key}");
        println!("cargo:rustc-env={key}={value}");
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
