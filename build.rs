use std::path::PathBuf;

fn main() {
    let kernel_bin = PathBuf::from(std::env::var_os("CARGO_BIN_FILE_TASKCORE-KERNEL_kernel").unwrap());
    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").unwrap());

    let uefi_path = out_dir.join("taskcore-uefi.img");
    bootloader::UefiBoot::new(&kernel_bin)
        .create_disk_image(&uefi_path)
        .expect("failed to build UEFI boot image");

    let bios_path = out_dir.join("taskcore-bios.img");
    bootloader::BiosBoot::new(&kernel_bin)
        .create_disk_image(&bios_path)
        .expect("failed to build BIOS boot image");

    println!("cargo:rustc-env=UEFI_PATH={}", uefi_path.display());
    println!("cargo:rustc-env=BIOS_PATH={}", bios_path.display());

    let ovmf = ovmf_prebuilt::Prebuilt::fetch(ovmf_prebuilt::Source::LATEST, out_dir.join("ovmf"))
        .expect("failed to fetch prebuilt OVMF files");
    println!("cargo:rustc-env=OVMF_CODE={}", ovmf.get_file(ovmf_prebuilt::Arch::X64, ovmf_prebuilt::FileType::Code).display());
    println!("cargo:rustc-env=OVMF_VARS={}", ovmf.get_file(ovmf_prebuilt::Arch::X64, ovmf_prebuilt::FileType::Vars).display());
}
