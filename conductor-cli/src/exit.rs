//! Process exit codes. `0` ok, `2` usage, `3` not-found, `4` conflict, `5`
//! any other runtime error (timeout, capacity, storage, cancelled, agent).

use conductor_core::error::{Kind, RuntimeError};

pub const OK: i32 = 0;
pub const USAGE: i32 = 2;
pub const NOT_FOUND: i32 = 3;
pub const CONFLICT: i32 = 4;
pub const RUNTIME_ERROR: i32 = 5;

pub fn code_for(kind: Kind) -> i32 {
    match kind {
        Kind::Usage => USAGE,
        Kind::NotFound => NOT_FOUND,
        Kind::Conflict => CONFLICT,
        Kind::Timeout | Kind::Capacity | Kind::Storage | Kind::Cancelled | Kind::Agent => RUNTIME_ERROR,
    }
}

/// Prints `kind: message` to stderr and exits with the matching code.
/// Never returns.
pub fn fail(err: RuntimeError) -> ! {
    eprintln!("conductor: {err}");
    std::process::exit(code_for(err.kind));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_each_kind_to_its_documented_code() {
        assert_eq!(code_for(Kind::Usage), USAGE);
        assert_eq!(code_for(Kind::NotFound), NOT_FOUND);
        assert_eq!(code_for(Kind::Conflict), CONFLICT);
        assert_eq!(code_for(Kind::Timeout), RUNTIME_ERROR);
        assert_eq!(code_for(Kind::Capacity), RUNTIME_ERROR);
        assert_eq!(code_for(Kind::Storage), RUNTIME_ERROR);
        assert_eq!(code_for(Kind::Cancelled), RUNTIME_ERROR);
        assert_eq!(code_for(Kind::Agent), RUNTIME_ERROR);
    }
}
