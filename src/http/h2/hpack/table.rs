//! HPACK static and dynamic tables (RFC 7541 Sections 2.3 and 4)
//!
//! The static table is a process-wide constant. The dynamic table is
//! per-connection, ordered newest-first, and bounded by a size metric of
//! `name.len() + value.len() + 32` per entry.

use super::HpackError;
use std::collections::VecDeque;

/// Overhead charged to every dynamic table entry (RFC 7541 Section 4.1)
pub const ENTRY_OVERHEAD: usize = 32;

/// The HPACK static table (RFC 7541 Appendix A), 1-indexed on the wire.
#[rustfmt::skip]
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),                        //  1
    (":method", "GET"),                        //  2
    (":method", "POST"),                       //  3
    (":path", "/"),                            //  4
    (":path", "/index.html"),                  //  5
    (":scheme", "http"),                       //  6
    (":scheme", "https"),                      //  7
    (":status", "200"),                        //  8
    (":status", "204"),                        //  9
    (":status", "206"),                        // 10
    (":status", "304"),                        // 11
    (":status", "400"),                        // 12
    (":status", "404"),                        // 13
    (":status", "500"),                        // 14
    ("accept-charset", ""),                    // 15
    ("accept-encoding", "gzip, deflate"),      // 16
    ("accept-language", ""),                   // 17
    ("accept-ranges", ""),                     // 18
    ("accept", ""),                            // 19
    ("access-control-allow-origin", ""),       // 20
    ("age", ""),                               // 21
    ("allow", ""),                             // 22
    ("authorization", ""),                     // 23
    ("cache-control", ""),                     // 24
    ("content-disposition", ""),               // 25
    ("content-encoding", ""),                  // 26
    ("content-language", ""),                  // 27
    ("content-length", ""),                    // 28
    ("content-location", ""),                  // 29
    ("content-range", ""),                     // 30
    ("content-type", ""),                      // 31
    ("cookie", ""),                            // 32
    ("date", ""),                              // 33
    ("etag", ""),                              // 34
    ("expect", ""),                            // 35
    ("expires", ""),                           // 36
    ("from", ""),                              // 37
    ("host", ""),                              // 38
    ("if-match", ""),                          // 39
    ("if-modified-since", ""),                 // 40
    ("if-none-match", ""),                     // 41
    ("if-range", ""),                          // 42
    ("if-unmodified-since", ""),               // 43
    ("last-modified", ""),                     // 44
    ("link", ""),                              // 45
    ("location", ""),                          // 46
    ("max-forwards", ""),                      // 47
    ("proxy-authenticate", ""),                // 48
    ("proxy-authorization", ""),               // 49
    ("range", ""),                             // 50
    ("referer", ""),                           // 51
    ("refresh", ""),                           // 52
    ("retry-after", ""),                       // 53
    ("server", ""),                            // 54
    ("set-cookie", ""),                        // 55
    ("strict-transport-security", ""),         // 56
    ("transfer-encoding", ""),                 // 57
    ("user-agent", ""),                        // 58
    ("vary", ""),                              // 59
    ("via", ""),                               // 60
    ("www-authenticate", ""),                  // 61
];

/// Result of a static table lookup
pub enum Lookup {
    /// Exact name+value match at this 1-based index
    Exact(usize),
    /// Name-only match at this 1-based index
    Name(usize),
    /// No match
    Miss,
}

/// Look up a (name, value) pair in the static table
pub fn static_lookup(name: &str, value: &str) -> Lookup {
    let mut name_match = None;

    for (i, &(n, v)) in STATIC_TABLE.iter().enumerate() {
        if n == name {
            if v == value {
                return Lookup::Exact(i + 1);
            }
            if name_match.is_none() {
                name_match = Some(i + 1);
            }
        }
    }

    match name_match {
        Some(idx) => Lookup::Name(idx),
        None => Lookup::Miss,
    }
}

/// The per-connection dynamic table, newest entry first.
#[derive(Debug)]
pub struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
    /// Ceiling the peer may not raise `max_size` past (local SETTINGS value)
    protocol_max: usize,
}

impl DynamicTable {
    /// Create a table with the given initial and protocol-maximum sizes
    pub fn new(max_size: usize) -> Self {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
            protocol_max: max_size,
        }
    }

    /// Current size per the RFC metric
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raise the protocol ceiling (from a SETTINGS_HEADER_TABLE_SIZE update)
    pub fn set_protocol_max(&mut self, protocol_max: usize) {
        self.protocol_max = protocol_max;
        if self.max_size > protocol_max {
            self.max_size = protocol_max;
            self.evict();
        }
    }

    /// Apply an in-stream dynamic table size update instruction.
    ///
    /// A size above the SETTINGS-negotiated ceiling is a compression error.
    pub fn update_max_size(&mut self, new_size: usize) -> Result<(), HpackError> {
        if new_size > self.protocol_max {
            return Err(HpackError::TableSizeUpdate(new_size));
        }
        self.max_size = new_size;
        self.evict();
        Ok(())
    }

    /// Insert an entry at the front, evicting from the back as needed.
    ///
    /// An entry larger than the whole table empties it (RFC 7541 §4.4).
    pub fn insert(&mut self, name: String, value: String) {
        let entry_size = name.len() + value.len() + ENTRY_OVERHEAD;
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.size += entry_size;
        self.entries.push_front((name, value));
        self.evict();
    }

    /// Get an entry by 1-based dynamic index (1 = most recent)
    pub fn get(&self, index: usize) -> Option<(&str, &str)> {
        self.entries
            .get(index.checked_sub(1)?)
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn evict(&mut self) {
        while self.size > self.max_size {
            match self.entries.pop_back() {
                Some((name, value)) => {
                    self.size -= name.len() + value.len() + ENTRY_OVERHEAD;
                }
                None => break,
            }
        }
    }
}

/// Resolve a wire index against the static table then the dynamic table.
///
/// Index 0 and indices past both tables are compression errors.
pub fn resolve_index(table: &DynamicTable, index: usize) -> Result<(String, String), HpackError> {
    if index == 0 {
        return Err(HpackError::InvalidIndex(0));
    }
    if index <= STATIC_TABLE.len() {
        let (name, value) = STATIC_TABLE[index - 1];
        return Ok((name.to_string(), value.to_string()));
    }
    match table.get(index - STATIC_TABLE.len()) {
        Some((name, value)) => Ok((name.to_string(), value.to_string())),
        None => Err(HpackError::InvalidIndex(index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_table_shape() {
        assert_eq!(STATIC_TABLE.len(), 61);
        assert_eq!(STATIC_TABLE[0], (":authority", ""));
        assert_eq!(STATIC_TABLE[1], (":method", "GET"));
        assert_eq!(STATIC_TABLE[7], (":status", "200"));
        assert_eq!(STATIC_TABLE[60], ("www-authenticate", ""));
    }

    #[test]
    fn test_static_lookup() {
        assert!(matches!(static_lookup(":method", "GET"), Lookup::Exact(2)));
        assert!(matches!(static_lookup(":status", "201"), Lookup::Name(8)));
        assert!(matches!(static_lookup("x-custom", "v"), Lookup::Miss));
    }

    #[test]
    fn test_dynamic_insert_and_get() {
        let mut table = DynamicTable::new(4096);
        table.insert("a".into(), "1".into());
        table.insert("b".into(), "2".into());

        // Entry 1 is most recent
        assert_eq!(table.get(1), Some(("b", "2")));
        assert_eq!(table.get(2), Some(("a", "1")));
        assert_eq!(table.get(3), None);
        assert_eq!(table.size(), 2 * (1 + 1 + ENTRY_OVERHEAD));
    }

    #[test]
    fn test_dynamic_eviction() {
        // Room for exactly two entries of size 34 each
        let mut table = DynamicTable::new(68);
        table.insert("a".into(), "1".into());
        table.insert("b".into(), "2".into());
        assert_eq!(table.len(), 2);

        table.insert("c".into(), "3".into());
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1), Some(("c", "3")));
        assert_eq!(table.get(2), Some(("b", "2")));
    }

    #[test]
    fn test_oversized_entry_clears_table() {
        let mut table = DynamicTable::new(40);
        table.insert("a".into(), "1".into());
        assert_eq!(table.len(), 1);

        let long_value = "x".repeat(100);
        table.insert("big".into(), long_value);
        assert!(table.is_empty());
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn test_size_update_bounds() {
        let mut table = DynamicTable::new(4096);
        assert!(table.update_max_size(0).is_ok());
        assert!(table.update_max_size(4096).is_ok());
        assert!(table.update_max_size(4097).is_err());
    }

    #[test]
    fn test_size_update_evicts() {
        let mut table = DynamicTable::new(4096);
        table.insert("a".into(), "1".into());
        table.insert("b".into(), "2".into());
        table.update_max_size(34).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1), Some(("b", "2")));
    }

    #[test]
    fn test_resolve_index() {
        let mut table = DynamicTable::new(4096);
        table.insert("x-recent".into(), "yes".into());

        assert!(resolve_index(&table, 0).is_err());
        assert_eq!(
            resolve_index(&table, 2).unwrap(),
            (":method".to_string(), "GET".to_string())
        );
        assert_eq!(
            resolve_index(&table, 62).unwrap(),
            ("x-recent".to_string(), "yes".to_string())
        );
        assert!(resolve_index(&table, 63).is_err());
    }
}
