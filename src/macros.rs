macro_rules! opaque_id {
    ($(#[$attr:meta])* $n:ident($t:ty)) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
        #[repr(transparent)]
        pub struct $n($t);

        impl $n {
            pub const fn new(raw: $t) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> $t {
                self.0
            }
        }

        impl ::std::fmt::Debug for $n {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, concat!(stringify!($n), "({:#x})"), self.0)
            }
        }

        impl ::std::fmt::Display for $n {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        ::static_assertions::assert_impl_all!($n: Send, Sync);
    };
}
