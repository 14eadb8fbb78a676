use flagset::{flags, FlagSet};

flags! {
    /// Operations a stream is allowed to perform on the target process.
    pub enum Access: u8 {
        Read = 0b01,
        Write = 0b10,
        ReadWrite = (Access::Read | Access::Write).bits(),
    }
}

pub(crate) fn describe(access: FlagSet<Access>) -> &'static str {
    match (access.contains(Access::Read), access.contains(Access::Write)) {
        (true, true) => "read-write",
        (true, false) => "read-only",
        (false, true) => "write-only",
        (false, false) => "no access",
    }
}
