//! Growth policies for stack arenas. A [`Magnifier`](super::Magnifier) maps the size of the last
//! segment to the size of the next one; the arena never asks for less than a request needs, so a
//! magnifier only has to describe the steady-state growth.

const PAGE: usize = 4096;

/// Doubles the segment size, rounded up to a power of two.
pub fn double(size: usize) -> usize {
    size.saturating_mul(2)
        .checked_next_power_of_two()
        .unwrap_or(size)
}

/// Grows by half again, rounded up to a whole page.
pub fn page_and_half(size: usize) -> usize {
    let grown = size.saturating_add(size / 2);
    grown.checked_next_multiple_of(PAGE).unwrap_or(grown)
}

/// Keeps every segment the same size.
pub const fn exact(size: usize) -> usize {
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnifiers() {
        assert_eq!(double(64), 128);
        assert_eq!(double(100), 256, "Doubling should round up to a power of two.");
        assert_eq!(page_and_half(4096), 8192);
        assert_eq!(page_and_half(8192), 12288);
        assert_eq!(exact(1000), 1000);
    }
}
