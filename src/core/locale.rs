// The closed set of languages a text sheet may carry. Column headers are
// matched against these names case-sensitively; anything else is treated as
// a non-locale column.

macro_rules! locales {
    ($($variant:ident),+ $(,)?) => {
        /// A supported translation language.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Locale {
            $($variant,)+
        }

        impl Locale {
            /// Parses a column header. Case-sensitive; `None` for headers
            /// that are not locale names (e.g. `Key`, `Comment`).
            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $(stringify!($variant) => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

locales! {
    Afrikaans,
    Arabic,
    Basque,
    Belarusian,
    Bulgarian,
    Catalan,
    Chinese,
    ChineseSimplified,
    ChineseTraditional,
    Czech,
    Danish,
    Dutch,
    English,
    Estonian,
    Faroese,
    Finnish,
    French,
    German,
    Greek,
    Hebrew,
    Hungarian,
    Icelandic,
    Indonesian,
    Italian,
    Japanese,
    Korean,
    Latvian,
    Lithuanian,
    Norwegian,
    Polish,
    Portuguese,
    Romanian,
    Russian,
    SerboCroatian,
    Slovak,
    Slovenian,
    Spanish,
    Swedish,
    Thai,
    Turkish,
    Ukrainian,
    Vietnamese,
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
