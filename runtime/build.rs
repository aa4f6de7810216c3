use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Embed the arm64 UEFI firmware when a path to it is provided at build time
    println!("cargo:rerun-if-env-changed=GOM_EFI_FIRMWARE");
    println!("cargo:rustc-check-cfg=cfg(gom_embedded_firmware)");

    if let Some(path) = std::env::var_os("GOM_EFI_FIRMWARE") {
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(format!("GOM_EFI_FIRMWARE={} is not a file", path.display()).into());
        }

        let path = path.canonicalize()?;
        println!("cargo:rerun-if-changed={}", path.display());
        println!("cargo:rustc-cfg=gom_embedded_firmware");
        println!("cargo:rustc-env=GOM_EMBEDDED_FIRMWARE_PATH={}", path.display());
    }

    Ok(())
}
