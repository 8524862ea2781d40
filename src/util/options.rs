use crate::mark::registry::MAX_REGISTRY_CAPACITY;
use crate::mark::work_queue::STEAL_FRACTION_DENOMINATOR;
use std::default::Default;

/// Environment variables with this prefix (followed by the upper-cased option name) override
/// the defaults, e.g. `PARMARK_AUX_GC_THREADS=3`.
pub const ENV_PREFIX: &str = "PARMARK_";

/// The default allocation volume between two collections for `AllocationThresholdPolicy`.
pub const DEFAULT_ALLOCATION_THRESHOLD: usize = 8 << 20;

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),* $(,)?) => [
        /// Runtime options of the collector.
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }

        impl Options {
            /// Set an option from its string form. Returns `false` and keeps the current value if
            /// the key is unknown, the value cannot be parsed, or the validator rejects it.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(&val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val;
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Current value will be kept.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Can't parse value. Current value will be kept.", s, val);
                        false
                    },)*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Is `s` the name of an option?
            pub fn is_option(s: &str) -> bool {
                matches!(s, $(stringify!($name))|*)
            }
        }

        impl Default for Options {
            fn default() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
    ]
}

options! {
    /// Number of auxiliary GC threads, in addition to the main GC thread.
    aux_gc_threads:             usize [always_valid] = num_cpus::get().saturating_sub(1),
    /// Should mutators at a safepoint mark their own roots and help with parallel marking?
    mutators_cooperate:         bool  [always_valid] = false,
    /// A thief takes `steal_fraction_numerator / 4` of a victim's shared list.
    steal_fraction_numerator:   usize [|v: &usize| (1..=STEAL_FRACTION_DENOMINATOR).contains(v)] = 1,
    /// Local queue length from which a worker proactively shares its work.
    min_size_to_share:          usize [|v: &usize| *v > 0] = 256,
    /// Sweeps over all victims before an idle worker parks.
    steal_attempt_cycles:       usize [|v: &usize| *v > 0] = 4,
    /// Initial number of slots in the mark job registry. It grows between epochs when needed.
    registry_capacity:          usize [|v: &usize| (1..=MAX_REGISTRY_CAPACITY).contains(v)] = 64,
    /// Resume mutators before sweeping instead of after.
    concurrent_sweep:           bool  [always_valid] = true,
    /// Process weak references with the world resumed, guarded by weak barriers.
    concurrent_weak_processing: bool  [always_valid] = false,
    /// Bytes allocated between two collections when the allocation threshold policy is used.
    allocation_threshold:       usize [|v: &usize| *v > 0] = DEFAULT_ALLOCATION_THRESHOLD,
}

impl Options {
    /// Options with defaults overridden by `PARMARK_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = Options::default();
        options.read_env_var_settings();
        options
    }

    /// Apply every environment variable that starts with `PARMARK_` and names an option.
    pub fn read_env_var_settings(&mut self) {
        for (key, val) in std::env::vars() {
            // strip the prefix, and get the lower case string
            if let Some(rest_of_key) = key.strip_prefix(ENV_PREFIX) {
                let lowercase: &str = &rest_of_key.to_lowercase();
                if Self::is_option(lowercase) {
                    self.set_from_str(lowercase, &val);
                }
            }
        }
    }

    /// Set options in bulk from a whitespace separated list of `key=value` pairs. Every pair is
    /// attempted; returns `true` only if all of them were applied.
    pub fn set_bulk_from_command_line(&mut self, options: &str) -> bool {
        let mut all_set = true;
        for opt in options.split_ascii_whitespace() {
            match opt.split_once('=') {
                Some((key, val)) => all_set &= self.set_from_str(key, val),
                None => {
                    warn!("Malformed option {:?}, expected key=value", opt);
                    all_set = false;
                }
            }
        }
        all_set
    }
}
