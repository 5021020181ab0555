fn main() {
    #[cfg(feature = "ddp")]
    link_ddp();
}

/// Link `ddp-main` against the DDP runtime. `DDPPATH` points to a DDP
/// installation, `DDP_PROGRAM` to the object file with `ddp_ddpmain`.
#[cfg(feature = "ddp")]
fn link_ddp() {
    use std::{env, path::PathBuf};

    println!("cargo:rerun-if-env-changed=DDPPATH");
    println!("cargo:rerun-if-env-changed=DDP_LINK_LIBS");
    println!("cargo:rerun-if-env-changed=DDP_PROGRAM");

    let Ok(ddp_path) = env::var("DDPPATH") else {
        println!("cargo:warning=DDPPATH is not set. ddp-main will not link.");
        return;
    };

    let lib_dir = PathBuf::from(ddp_path).join("lib");
    println!("cargo:rustc-link-arg-bin=ddp-main=-L{}", lib_dir.display());

    if let Ok(program) = env::var("DDP_PROGRAM") {
        println!("cargo:rerun-if-changed={program}");
        println!("cargo:rustc-link-arg-bin=ddp-main={program}");
    }

    let libs = env::var("DDP_LINK_LIBS").unwrap_or_else(|_| "ddpstdlib,ddpruntime,m".into());
    libs.split(',')
        .map(str::trim)
        .filter(|lib| !lib.is_empty())
        .for_each(|lib| println!("cargo:rustc-link-arg-bin=ddp-main=-l{lib}"));
}
