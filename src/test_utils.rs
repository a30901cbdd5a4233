//! Test utilities for property-based testing
//!
//! This module provides generators and fixtures shared by unit tests.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid option name
    pub fn option_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    /// Generate lines of source text
    pub fn source_lines() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z ]{0,12}", 1..30)
    }
}

#[cfg(test)]
pub mod fixtures {
    use crate::core::recipe::Recipe;

    /// Recipe exercising every recipe section
    pub const SAMPLE_RECIPE: &str = r#"
[recipe]
name = "emacs"
version = "24.3"
homepage = "http://www.gnu.org/software/emacs/"
url = "http://ftpmirror.gnu.org/emacs/emacs-24.3.tar.gz"
mirrors = ["http://ftp.gnu.org/pub/gnu/emacs/emacs-24.3.tar.gz"]
checksum = "sha256:0098ca3204813d69cd8412045ba33e8701fa2062f4bff56bedafc064979eef41"
skip_clean = ["share/info"]

[[head]]
url = "http://git.sv.gnu.org/r/emacs.git"
selector = "use-git-head"

[[head]]
url = "hg://http://hg.example.org/emacs"
selector = "use-hg-head"

[[head]]
url = "bzr://http://bzr.savannah.gnu.org/r/emacs/trunk"

[[option]]
name = "cocoa"
description = "Build a Cocoa version of emacs"

[[option]]
name = "srgb"
description = "Enable sRGB colors in the Cocoa version of emacs"
requires = "cocoa"

[[option]]
name = "with-x"
description = "Include X11 support"
conflicts = ["cocoa"]

[[option]]
name = "keep-ctags"
description = "Don't remove the ctags executable that emacs provides"

[[dependency]]
name = "pkg-config"
kind = "build"

[[dependency]]
name = "autoconf"
kind = "build"
when = "head"

[[dependency]]
name = "x11"
when = "with-x"

[[dependency]]
name = "gnutls"
kind = "optional"

[[fails_with]]
toolchain = "llvm"
build = 2334
cause = "Duplicate symbol errors while linking."

[patches]
release_only = true

[[patches.patch]]
strip = 1
inline = """
--- a/src/emacs.c
+++ b/src/emacs.c
@@ -1,3 +1,3 @@
 int main(void)
-{ return 1; }
+{ return 0; }
 /* end */
"""

[build]
configure_args = ["--prefix={prefix}", "--infodir={info}/emacs", "--without-dbus"]
parallel_unsafe = "head"

[[build.bootstrap]]
when = "head"
run = ["./autogen.sh"]

[[build.args]]
when = "dep:gnutls"
args = ["--with-gnutls"]
else = ["--without-gnutls"]

[[build.args]]
when = "cocoa"
args = ["--with-ns", "--disable-ns-self-contained"]

[[build.args]]
when = "with-x"
args = ["--with-x"]
else = ["--without-x"]

[[build.env]]
when = "with-x"
var = "LDFLAGS"
append = "-lfreetype -lfontconfig"

[[build.env]]
when = "with-x"
var = "CPPFLAGS"
prepend = "-I/usr/X11/include"

[[build.inreplace]]
when = "cocoa && srgb"
path = "src/nsterm.m"
from = "*col = [NSColor colorWithCalibratedRed"
to = "*col = [NSColor colorWithDeviceRed"

[[install.bundle]]
when = "cocoa"
from = "nextstep/Emacs.app"
to = "Emacs.app"

[[install.remove]]
when = "!keep-ctags"
paths = ["bin/ctags", "share/man/man1/ctags.1.gz"]

[[install.wrapper]]
when = "cocoa"
path = "bin/emacs"
exec = "{prefix}/Emacs.app/Contents/MacOS/Emacs"
args = ["-nw"]

[[caveat]]
when = "cocoa"
text = "Emacs.app was installed to:\n  {prefix}\n"
"#;

    /// Parsed [`SAMPLE_RECIPE`]
    pub fn sample_recipe() -> Recipe {
        Recipe::from_toml(SAMPLE_RECIPE).expect("sample recipe is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample_recipe;
    use super::generators::*;
    use proptest::prelude::*;

    #[test]
    fn test_sample_recipe_parses() {
        let recipe = sample_recipe();
        assert_eq!(recipe.name(), "emacs");
        assert_eq!(recipe.head.len(), 3);
        assert_eq!(recipe.patches.patches.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_option_names_are_valid(name in option_name()) {
            prop_assert!(crate::core::condition::is_option_name(&name));
        }
    }
}
