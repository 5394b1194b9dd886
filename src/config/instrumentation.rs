use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
    sync::OnceLock,
};

use regex::Regex;

use crate::{config::MethodRef, instrument::ClassDetails, Error, Result};

/// Package prefixes that are never acquired. Redefining these would split the host
/// runtime's own types between two loaders.
pub const RUNTIME_DENYLIST: &[&str] = &[
    "java.",
    "javax.",
    "jdk.",
    "sun.",
    "com.sun.",
    "kotlin.",
    "org.junit.",
    "org.hamcrest.",
];

/// Package of the dispatch machinery; never acquired.
pub const INTERNAL_PACKAGE: &str = "shadowbox.";

/// Marker annotation requesting instrumentation.
pub const INSTRUMENT_ANNOTATION: &str = "shadowbox.annotation.Instrument";

/// Marker annotation vetoing instrumentation.
pub const DO_NOT_INSTRUMENT_ANNOTATION: &str = "shadowbox.annotation.DoNotInstrument";

fn platform_resource_class() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(android|com\.android\.internal)\.R(\$.+)?$").expect("valid resource regex")
    })
}

fn application_resource_class() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^.*\.R(|\$[a-z]+)$").expect("valid resource regex"))
}

/// A compiled regular expression compared by its source text.
#[derive(Clone)]
pub struct ClassPattern {
    source: String,
    regex: Regex,
}

impl ClassPattern {
    /// Compiles `source`, anchored to match whole class names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `source` is not a valid regular expression.
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{source})$"))
            .map_err(|e| Error::Configuration(format!("invalid class pattern '{source}': {e}")))?;
        Ok(ClassPattern {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if the whole of `class_name` matches.
    #[must_use]
    pub fn is_match(&self, class_name: &str) -> bool {
        self.regex.is_match(class_name)
    }
}

impl fmt::Debug for ClassPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClassPattern").field(&self.source).finish()
    }
}

impl PartialEq for ClassPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for ClassPattern {}

impl Hash for ClassPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

/// The rule set deciding which classes a sandbox loads itself and which it rewrites.
///
/// Class and package names are dotted binary names (`android.os.Build$VERSION`,
/// `android.`). All collections are ordered sets so equality and hashing are
/// structural: two configurations with the same rules are interchangeable, which is
/// what lets [`crate::sandbox::SandboxManager`] reuse a sandbox.
///
/// # Examples
///
/// ```rust
/// use shadowbox::config::InstrumentationConfiguration;
///
/// let config = InstrumentationConfiguration::builder()
///     .add_instrumented_package("com.example.")
///     .do_not_acquire_package("com.example.host.")
///     .build();
/// assert!(config.should_acquire("com.example.Foo"));
/// assert!(!config.should_acquire("com.example.host.Bridge"));
/// assert!(!config.should_acquire("java.util.ArrayList"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InstrumentationConfiguration {
    instrumented_packages: BTreeSet<String>,
    instrumented_classes: BTreeSet<String>,
    classes_to_not_instrument: BTreeSet<String>,
    packages_to_not_instrument: BTreeSet<String>,
    do_not_instrument_pattern: Option<ClassPattern>,
    classes_to_acquire: BTreeSet<String>,
    classes_to_not_acquire: BTreeSet<String>,
    packages_to_not_acquire: BTreeSet<String>,
    class_name_translations: BTreeMap<String, String>,
    intercepted_methods: BTreeSet<MethodRef>,
}

impl InstrumentationConfiguration {
    /// Starts an empty rule set.
    #[must_use]
    pub fn builder() -> InstrumentationConfigurationBuilder {
        InstrumentationConfigurationBuilder::default()
    }

    /// Starts a builder pre-populated with this configuration's rules.
    #[must_use]
    pub fn to_builder(&self) -> InstrumentationConfigurationBuilder {
        InstrumentationConfigurationBuilder {
            config: self.clone(),
        }
    }

    /// Decides whether the sandbox loader defines `class_name` itself.
    ///
    /// Rules apply in order: the dispatch machinery is never acquired; explicit
    /// acquire and do-not-acquire classes; platform `R` classes are acquired; the
    /// runtime denylist and do-not-acquire packages are not; application `R`
    /// classes are not; everything else is.
    #[must_use]
    pub fn should_acquire(&self, class_name: &str) -> bool {
        if class_name.starts_with(INTERNAL_PACKAGE) {
            return false;
        }
        if self.classes_to_acquire.contains(class_name) {
            return true;
        }
        if self.classes_to_not_acquire.contains(class_name) {
            return false;
        }
        if platform_resource_class().is_match(class_name) {
            return true;
        }
        if RUNTIME_DENYLIST
            .iter()
            .any(|prefix| class_name.starts_with(prefix))
            || self
                .packages_to_not_acquire
                .iter()
                .any(|prefix| class_name.starts_with(prefix.as_str()))
        {
            return false;
        }
        !application_resource_class().is_match(class_name)
    }

    /// Decides whether `class` is rewritten on load.
    #[must_use]
    pub fn should_instrument(&self, class: &dyn ClassDetails) -> bool {
        if class.is_interface()
            || class.is_annotation()
            || class.has_annotation(DO_NOT_INSTRUMENT_ANNOTATION)
        {
            return false;
        }
        let name = class.name();
        if !self.should_acquire(&name) {
            return false;
        }
        let requested = self.instrumented_classes.contains(&name)
            || self
                .instrumented_packages
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
            || class.has_annotation(INSTRUMENT_ANNOTATION);
        requested && !self.is_excluded(&name)
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.classes_to_not_instrument.contains(name)
            || self
                .packages_to_not_instrument
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
            || self
                .do_not_instrument_pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(name))
    }

    /// Returns `true` if calls to `class_name.method_name` are rewritten to the intercept path.
    #[must_use]
    pub fn is_intercepted(&self, class_name: &str, method_name: &str) -> bool {
        method_name != "<init>"
            && self
                .intercepted_methods
                .iter()
                .any(|method| method.matches(class_name, method_name))
    }

    /// The replacement name for `class_name`, if one is configured.
    #[must_use]
    pub fn translated_name(&self, class_name: &str) -> Option<&str> {
        self.class_name_translations
            .get(class_name)
            .map(String::as_str)
    }

    /// Whether any class name translations are configured.
    #[must_use]
    pub fn has_translations(&self) -> bool {
        !self.class_name_translations.is_empty()
    }

    /// Configured intercepted methods.
    pub fn intercepted_methods(&self) -> impl Iterator<Item = &MethodRef> {
        self.intercepted_methods.iter()
    }

    /// Configured instrumented package prefixes.
    pub fn instrumented_packages(&self) -> impl Iterator<Item = &str> {
        self.instrumented_packages.iter().map(String::as_str)
    }
}

/// Builder for [`InstrumentationConfiguration`].
#[derive(Debug, Clone, Default)]
pub struct InstrumentationConfigurationBuilder {
    config: InstrumentationConfiguration,
}

fn dotted(name: &str) -> String {
    name.replace('/', ".")
}

impl InstrumentationConfigurationBuilder {
    /// Instruments every acquired class whose name starts with `prefix`.
    #[must_use]
    pub fn add_instrumented_package(mut self, prefix: &str) -> Self {
        self.config.instrumented_packages.insert(dotted(prefix));
        self
    }

    /// Instruments `class_name`.
    #[must_use]
    pub fn add_instrumented_class(mut self, class_name: &str) -> Self {
        self.config.instrumented_classes.insert(dotted(class_name));
        self
    }

    /// Never instruments `class_name`.
    #[must_use]
    pub fn do_not_instrument_class(mut self, class_name: &str) -> Self {
        self.config.classes_to_not_instrument.insert(dotted(class_name));
        self
    }

    /// Never instruments classes whose name starts with `prefix`.
    #[must_use]
    pub fn do_not_instrument_package(mut self, prefix: &str) -> Self {
        self.config.packages_to_not_instrument.insert(dotted(prefix));
        self
    }

    /// Never instruments classes whose whole name matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an invalid regular expression.
    pub fn set_do_not_instrument_pattern(mut self, pattern: &str) -> Result<Self> {
        self.config.do_not_instrument_pattern = Some(ClassPattern::new(pattern)?);
        Ok(self)
    }

    /// Always acquires `class_name`, even inside a denied package.
    #[must_use]
    pub fn do_acquire_class(mut self, class_name: &str) -> Self {
        self.config.classes_to_acquire.insert(dotted(class_name));
        self
    }

    /// Never acquires `class_name`.
    #[must_use]
    pub fn do_not_acquire_class(mut self, class_name: &str) -> Self {
        self.config.classes_to_not_acquire.insert(dotted(class_name));
        self
    }

    /// Never acquires classes whose name starts with `prefix`.
    #[must_use]
    pub fn do_not_acquire_package(mut self, prefix: &str) -> Self {
        self.config.packages_to_not_acquire.insert(dotted(prefix));
        self
    }

    /// Rewrites references to class `from` into references to `to`.
    #[must_use]
    pub fn add_class_name_translation(mut self, from: &str, to: &str) -> Self {
        self.config
            .class_name_translations
            .insert(dotted(from), dotted(to));
        self
    }

    /// Intercepts calls to `method`.
    #[must_use]
    pub fn add_intercepted_method(mut self, method: MethodRef) -> Self {
        self.config.intercepted_methods.insert(method);
        self
    }

    /// Intercepts every method in `methods`.
    #[must_use]
    pub fn add_intercepted_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = MethodRef>,
    {
        self.config.intercepted_methods.extend(methods);
        self
    }

    /// Freezes the rule set.
    #[must_use]
    pub fn build(self) -> InstrumentationConfiguration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    struct Details {
        name: &'static str,
        interface: bool,
        annotations: Vec<&'static str>,
    }

    impl ClassDetails for Details {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn is_interface(&self) -> bool {
            self.interface
        }

        fn is_annotation(&self) -> bool {
            false
        }

        fn has_annotation(&self, annotation_class: &str) -> bool {
            self.annotations.contains(&annotation_class)
        }
    }

    fn class(name: &'static str) -> Details {
        Details {
            name,
            interface: false,
            annotations: vec![],
        }
    }

    #[test]
    fn test_acquire_rules() {
        let config = InstrumentationConfiguration::builder()
            .do_acquire_class("java.util.Special")
            .do_not_acquire_class("com.example.Skip")
            .do_not_acquire_package("org.host.")
            .build();

        assert!(!config.should_acquire("shadowbox.internal.Dispatch"));
        assert!(config.should_acquire("java.util.Special"));
        assert!(!config.should_acquire("java.util.ArrayList"));
        assert!(!config.should_acquire("com.example.Skip"));
        assert!(!config.should_acquire("org.host.Thing"));
        assert!(config.should_acquire("android.R"));
        assert!(config.should_acquire("android.R$styleable"));
        assert!(config.should_acquire("com.android.internal.R$id"));
        assert!(!config.should_acquire("com.example.R"));
        assert!(!config.should_acquire("com.example.R$layout"));
        assert!(config.should_acquire("com.example.R$Inner"));
        assert!(config.should_acquire("com.example.Foo"));
    }

    #[test]
    fn test_instrument_rules() {
        let config = InstrumentationConfiguration::builder()
            .add_instrumented_package("android.")
            .add_instrumented_class("com.example.Listed")
            .do_not_instrument_class("android.Excluded")
            .do_not_instrument_package("android.skip.")
            .set_do_not_instrument_pattern(r"android\.gen\..*")
            .unwrap()
            .build();

        assert!(config.should_instrument(&class("android.view.View")));
        assert!(config.should_instrument(&class("com.example.Listed")));
        assert!(!config.should_instrument(&class("com.example.Other")));
        assert!(!config.should_instrument(&class("android.Excluded")));
        assert!(!config.should_instrument(&class("android.skip.Thing")));
        assert!(!config.should_instrument(&class("android.gen.Thing")));

        let interface = Details {
            name: "android.view.Listener",
            interface: true,
            annotations: vec![],
        };
        assert!(!config.should_instrument(&interface));

        let marked = Details {
            name: "com.example.Marked",
            interface: false,
            annotations: vec![INSTRUMENT_ANNOTATION],
        };
        assert!(config.should_instrument(&marked));

        let vetoed = Details {
            name: "android.view.Vetoed",
            interface: false,
            annotations: vec![DO_NOT_INSTRUMENT_ANNOTATION],
        };
        assert!(!config.should_instrument(&vetoed));
    }

    #[test]
    fn test_structural_equality() {
        let build = || {
            InstrumentationConfiguration::builder()
                .add_instrumented_package("b.")
                .add_instrumented_package("a.")
                .set_do_not_instrument_pattern("x.*")
                .unwrap()
                .build()
        };
        let first = build();
        let second = build();
        assert_eq!(first, second);

        let hash = |c: &InstrumentationConfiguration| {
            let mut hasher = DefaultHasher::new();
            c.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(&first), hash(&second));

        let third = first.to_builder().add_instrumented_package("c.").build();
        assert_ne!(first, third);
    }

    #[test]
    fn test_interception_never_covers_constructors() {
        let config = InstrumentationConfiguration::builder()
            .add_intercepted_method(MethodRef::all_methods("java.util.LinkedHashMap"))
            .build();
        assert!(config.is_intercepted("java.util.LinkedHashMap", "eldest"));
        assert!(!config.is_intercepted("java.util.LinkedHashMap", "<init>"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = InstrumentationConfiguration::builder().set_do_not_instrument_pattern("(");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
