//! Compiler environment per platform
//!
//! Linux builds use the hermetic clang from the tools directory and link
//! libstdc++ statically; mac and win use the system toolchain as-is.

use std::collections::BTreeMap;
use std::path::Path;

use gn_ci_step::Platform;

/// Environment overrides for generate/build steps. Pure in `platform`;
/// `tools_dir` only anchors the compiler paths.
pub fn build_env(platform: Platform, tools_dir: &Path) -> BTreeMap<String, String> {
    let bin = tools_dir.join("bin");
    let tool = |name: &str| bin.join(name).to_string_lossy().into_owned();

    match platform {
        Platform::Linux => BTreeMap::from([
            ("CC".to_string(), tool("clang")),
            ("CXX".to_string(), tool("clang++")),
            ("AR".to_string(), tool("llvm-ar")),
            (
                "LDFLAGS".to_string(),
                "-static-libstdc++ -ldl -lpthread".to_string(),
            ),
        ]),
        Platform::Mac | Platform::Win => BTreeMap::new(),
    }
}
