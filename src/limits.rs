pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ID_LEN: usize = 128;
pub const MAX_PURPOSE_LEN: usize = 1_000;
pub const MAX_NOTES_LEN: usize = 4_000;
pub const MAX_REMARKS_LEN: usize = 4_000;
pub const MAX_REQUIREMENTS: usize = 32;
pub const MAX_REQUIREMENT_LEN: usize = 128;

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 100;
