//! Configuration for the converter.
//!
//! [`CompilerOptions`] is consumed read-only by every stage of the compiler. It is validated
//! once by [`crate::Converter::new`]; conflicting settings are rejected there with
//! [`crate::Error::Configuration`] before any method is touched.

use crate::{program::MethodId, Error, Result};

/// Three-state toggle for the optional desugarings.
///
/// `Auto` enables the rewriting only when the configured minimum API level lacks native
/// support for the feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OffOrAuto {
    /// Never rewrite
    #[default]
    Off,
    /// Rewrite when the target platform needs it
    Auto,
}

/// Outliner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineOptions {
    /// Enable outlining (default: true).
    pub enabled: bool,

    /// Name of the synthesized support class (default: `GeneratedOutlineSupport`).
    pub class_name: String,

    /// Prefix of the synthesized methods, followed by their index (default: `outline`).
    pub method_prefix: String,

    /// Minimum number of instructions in an outlined sequence (default: 3).
    pub min_size: usize,

    /// Maximum number of instructions in an outlined sequence (default: 99).
    pub max_size: usize,

    /// Minimum number of occurrences across the program for a sequence to be outlined
    /// (default: 20).
    pub threshold: usize,
}

impl Default for OutlineOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            class_name: "GeneratedOutlineSupport".to_string(),
            method_prefix: "outline".to_string(),
            min_size: 3,
            max_size: 99,
            threshold: 20,
        }
    }
}

/// Inliner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InliningOptions {
    /// Instructions a caller may grow by through inlining in one pass (default: 50).
    pub inline_budget: usize,

    /// Maximum instruction count of a simple, inlinable method (default: 5).
    pub simple_method_max_size: usize,

    /// Budget used when double-inline callers are revisited (default: 200).
    pub double_inline_budget: usize,
}

impl Default for InliningOptions {
    fn default() -> Self {
        Self {
            inline_budget: 50,
            simple_method_max_size: 5,
            double_inline_budget: 200,
        }
    }
}

/// Which class file attributes survive compilation.
///
/// The optimizer itself does not read attributes; it only checks that the retained set is
/// consistent, because a dangling `InnerClasses`/`EnclosingMethod` pair or a kept generic
/// signature of a renamed class produces unusable output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct AttributeRemovalOptions {
    /// Keep `InnerClasses`.
    pub keep_inner_classes: bool,
    /// Keep `EnclosingMethod`.
    pub keep_enclosing_method: bool,
    /// Keep `Signature`.
    pub keep_signature: bool,
    /// Keep `Exceptions`.
    pub keep_exceptions: bool,
    /// Keep `SourceDebugExtension`.
    pub keep_source_debug_extension: bool,
    /// Keep `AnnotationDefault`.
    pub keep_annotation_default: bool,
}

impl AttributeRemovalOptions {
    /// Attribute name of `InnerClasses`.
    pub const INNER_CLASSES: &'static str = "InnerClasses";
    /// Attribute name of `EnclosingMethod`.
    pub const ENCLOSING_METHOD: &'static str = "EnclosingMethod";
    /// Attribute name of `Signature`.
    pub const SIGNATURE: &'static str = "Signature";
    /// Attribute name of `Exceptions`.
    pub const EXCEPTIONS: &'static str = "Exceptions";
    /// Attribute name of `SourceDebugExtension`.
    pub const SOURCE_DEBUG_EXTENSION: &'static str = "SourceDebugExtension";
    /// Attribute name of `AnnotationDefault`.
    pub const ANNOTATION_DEFAULT: &'static str = "AnnotationDefault";

    /// Keeps every attribute.
    #[must_use]
    pub fn keep_all() -> Self {
        Self {
            keep_inner_classes: true,
            keep_enclosing_method: true,
            keep_signature: true,
            keep_exceptions: true,
            keep_source_debug_extension: true,
            keep_annotation_default: true,
        }
    }

    /// Applies a `-keepattributes` style pattern list.
    ///
    /// Patterns are matched in order against each attribute name and may use `*` and `?`
    /// wildcards. A pattern starting with `!` stops the search for attributes it matches. An
    /// attribute that is already kept stays kept.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dexopt::compiler::AttributeRemovalOptions;
    ///
    /// let mut attributes = AttributeRemovalOptions::default();
    /// attributes.apply_pattern(&["!Signature", "*Class*", "Enclosing*"]);
    /// assert!(attributes.keep_inner_classes);
    /// assert!(attributes.keep_enclosing_method);
    /// assert!(!attributes.keep_signature);
    /// ```
    pub fn apply_pattern(&mut self, patterns: &[&str]) {
        let update = |previous: bool, name: &str| -> bool {
            let mut keep = previous;
            for pattern in patterns {
                if keep {
                    return true;
                }
                if let Some(negated) = pattern.strip_prefix('!') {
                    if wildcard_matches(negated, name) {
                        break;
                    }
                } else {
                    keep = wildcard_matches(pattern, name);
                }
            }
            keep
        };
        self.keep_inner_classes = update(self.keep_inner_classes, Self::INNER_CLASSES);
        self.keep_enclosing_method = update(self.keep_enclosing_method, Self::ENCLOSING_METHOD);
        self.keep_signature = update(self.keep_signature, Self::SIGNATURE);
        self.keep_exceptions = update(self.keep_exceptions, Self::EXCEPTIONS);
        self.keep_source_debug_extension =
            update(self.keep_source_debug_extension, Self::SOURCE_DEBUG_EXTENSION);
        self.keep_annotation_default =
            update(self.keep_annotation_default, Self::ANNOTATION_DEFAULT);
    }

    /// Checks that the retained attributes are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the offending attribute when `InnerClasses` and
    /// `EnclosingMethod` are not kept together, when `Signature` is kept without
    /// `InnerClasses`, or when `Signature` is kept while minifying.
    pub fn ensure_valid(&self, minifying: bool) -> Result<()> {
        if self.keep_inner_classes && !self.keep_enclosing_method {
            return Err(Error::Configuration(
                "Attribute InnerClasses requires EnclosingMethod attribute. \
                 Check -keepattributes directive."
                    .to_string(),
            ));
        }
        if !self.keep_inner_classes && self.keep_enclosing_method {
            return Err(Error::Configuration(
                "Attribute EnclosingMethod requires InnerClasses attribute. \
                 Check -keepattributes directive."
                    .to_string(),
            ));
        }
        if self.keep_signature && !self.keep_inner_classes {
            return Err(Error::Configuration(
                "Attribute Signature requires InnerClasses attribute. \
                 Check -keepattributes directive."
                    .to_string(),
            ));
        }
        if minifying && self.keep_signature {
            return Err(Error::Configuration(
                "Attribute Signature cannot be kept when minifying. \
                 Remove Signature from the retained attributes or disable minification."
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn wildcard_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    // previous row of the classic glob matching table
    let mut row = vec![false; text.len() + 1];
    row[0] = true;
    for &p in &pattern {
        let mut next = vec![false; text.len() + 1];
        next[0] = p == '*' && row[0];
        for j in 1..=text.len() {
            next[j] = match p {
                '*' => row[j] || next[j - 1],
                '?' => row[j - 1],
                c => row[j - 1] && c == text[j - 1],
            };
        }
        row = next;
    }
    row[text.len()]
}

/// Options of one compilation.
///
/// # Examples
///
/// ```rust
/// use dexopt::{CompilerOptions, compiler::OffOrAuto};
///
/// let mut options = CompilerOptions::default();
/// options.min_api_level = 21;
/// options.interface_method_desugaring = OffOrAuto::Auto;
/// assert!(options.enable_interface_method_desugaring());
/// assert!(!options.enable_try_with_resources_desugaring());
/// options.validate()?;
/// # Ok::<(), dexopt::Error>(())
/// ```
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct CompilerOptions {
    /// Keep debug positions in the output (default: false).
    pub debug: bool,

    /// The program is renamed after compilation (default: false).
    pub minify: bool,

    /// Verify SSA consistency after every pass (default: true).
    pub verify_ssa: bool,

    /// Worker threads for parallel batches, 0 for the rayon default (default: 0).
    pub num_threads: usize,

    /// Optimize the methods of a batch that was not cycle-broken in parallel (default: true).
    pub parallel_leaves: bool,

    /// Minimum platform API level the output must run on (default: 1).
    pub min_api_level: u32,

    /// Rewrite lambda creation sites to synthesized classes (default: true).
    pub desugar_lambdas: bool,

    /// Move static interface methods to companion classes (default: off).
    pub interface_method_desugaring: OffOrAuto,

    /// Rewrite `Throwable.addSuppressed` to a backport helper (default: off).
    pub try_with_resources_desugaring: OffOrAuto,

    /// Replace switches over enum switch maps by switches over ordinals (default: true).
    pub remove_switch_maps: bool,

    /// Inline simple methods (default: true).
    pub inline_accessors: bool,

    /// Inliner budgets.
    pub inlining: InliningOptions,

    /// Outliner settings.
    pub outline: OutlineOptions,

    /// Upper bound for dead code removal rounds per method (default: 16).
    pub max_dce_iterations: usize,

    /// Maximum number of registers of a method frame (default: 65535).
    pub max_registers: u16,

    /// Rounds of goto collapsing and peephole optimization after register allocation
    /// (default: 2).
    pub peephole_passes: usize,

    /// Only optimize methods whose `holder.name` is in this list; empty means all.
    pub method_filter: Vec<String>,

    /// Instrument methods whose `holder.name` is in this list to print their arguments.
    pub log_arguments_filter: Vec<String>,

    /// Retained class file attributes.
    pub attributes: AttributeRemovalOptions,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            debug: false,
            minify: false,
            verify_ssa: true,
            num_threads: 0,
            parallel_leaves: true,
            min_api_level: 1,
            desugar_lambdas: true,
            interface_method_desugaring: OffOrAuto::Off,
            try_with_resources_desugaring: OffOrAuto::Off,
            remove_switch_maps: true,
            inline_accessors: true,
            inlining: InliningOptions::default(),
            outline: OutlineOptions::default(),
            max_dce_iterations: 16,
            max_registers: u16::MAX,
            peephole_passes: 2,
            method_filter: Vec::new(),
            log_arguments_filter: Vec::new(),
            attributes: AttributeRemovalOptions::default(),
        }
    }
}

impl CompilerOptions {
    /// API level that introduced static and default interface methods.
    pub const INTERFACE_METHODS_API: u32 = 24;

    /// API level that introduced `Throwable.addSuppressed`, `Long.compare` and `Objects`.
    pub const K_API: u32 = 19;

    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that only lift and lower code: every optional pass off.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            desugar_lambdas: false,
            remove_switch_maps: false,
            inline_accessors: false,
            outline: OutlineOptions {
                enabled: false,
                ..OutlineOptions::default()
            },
            ..Self::default()
        }
    }

    /// Sets the outline threshold and size bounds.
    #[must_use]
    pub fn with_outline(mut self, threshold: usize, min_size: usize, max_size: usize) -> Self {
        self.outline.enabled = true;
        self.outline.threshold = threshold;
        self.outline.min_size = min_size;
        self.outline.max_size = max_size;
        self
    }

    /// Sets the number of worker threads and whether leaf batches run in parallel.
    #[must_use]
    pub fn with_threads(mut self, num_threads: usize, parallel_leaves: bool) -> Self {
        self.num_threads = num_threads;
        self.parallel_leaves = parallel_leaves;
        self
    }

    /// Checks the options for conflicts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for inconsistent attribute retention, an empty outline
    /// size range, a zero outline threshold, or a zero register limit.
    pub fn validate(&self) -> Result<()> {
        self.attributes.ensure_valid(self.minify)?;
        if self.outline.enabled {
            if self.outline.min_size == 0 || self.outline.min_size > self.outline.max_size {
                return Err(Error::Configuration(format!(
                    "Outline size range [{}, {}] is empty. Check outline.min_size and \
                     outline.max_size.",
                    self.outline.min_size, self.outline.max_size
                )));
            }
            if self.outline.threshold == 0 {
                return Err(Error::Configuration(
                    "Outline threshold must be at least 1. Check outline.threshold.".to_string(),
                ));
            }
            if self.outline.class_name.is_empty() || self.outline.method_prefix.is_empty() {
                return Err(Error::Configuration(
                    "Outline class name and method prefix must not be empty.".to_string(),
                ));
            }
        }
        if self.max_registers == 0 {
            return Err(Error::Configuration(
                "max_registers must be at least 1.".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns `true` if `method` should be optimized.
    #[must_use]
    pub fn method_matches_filter(&self, method: &MethodId) -> bool {
        self.method_filter.is_empty()
            || self
                .method_filter
                .iter()
                .any(|name| *name == method.qualified_name())
    }

    /// Returns `true` if `method` should print its arguments on entry.
    #[must_use]
    pub fn method_matches_log_arguments_filter(&self, method: &MethodId) -> bool {
        !self.log_arguments_filter.is_empty()
            && self
                .log_arguments_filter
                .iter()
                .any(|name| *name == method.qualified_name())
    }

    /// Returns `true` if static interface methods are moved to companion classes.
    #[must_use]
    pub fn enable_interface_method_desugaring(&self) -> bool {
        self.interface_method_desugaring == OffOrAuto::Auto
            && self.min_api_level < Self::INTERFACE_METHODS_API
    }

    /// Returns `true` if `addSuppressed` calls are rewritten.
    #[must_use]
    pub fn enable_try_with_resources_desugaring(&self) -> bool {
        self.try_with_resources_desugaring == OffOrAuto::Auto && self.min_api_level < Self::K_API
    }

    /// Returns `true` if `Long.compare` and `Objects.requireNonNull` exist on the target.
    #[must_use]
    pub fn can_use_long_compare_and_objects_non_null(&self) -> bool {
        self.min_api_level >= Self::K_API
    }
}
