/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Discord snowflakes arrive as JSON strings but are handled as `u64` internally.
macro_rules! define_snowflake {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(pub u64);

            impl From<u64> for $name {
                fn from(v: u64) -> Self {
                    Self(v)
                }
            }

            impl std::str::FromStr for $name {
                type Err = std::num::ParseIntError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    s.trim().parse::<u64>().map(Self)
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl serde::Serialize for $name {
                fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(&self.0)
                }
            }

            impl<'de> serde::Deserialize<'de> for $name {
                fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    #[derive(serde::Deserialize)]
                    #[serde(untagged)]
                    enum Raw {
                        Str(String),
                        Num(u64),
                    }

                    match Raw::deserialize(deserializer)? {
                        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
                        Raw::Num(n) => Ok(Self(n)),
                    }
                }
            }
        )*
    };
}

define_snowflake!(
    /// Discord guild (server) identifier.
    GuildId,
    /// Voice or text channel identifier.
    ChannelId,
    UserId,
    /// Message identifier, used for the status panel.
    MessageId,
);
