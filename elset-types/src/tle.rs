/// Element lines as delivered by a provider, before they are stored.
/// https://en.wikipedia.org/wiki/Two-line_element_set
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RawElementSet {
    /// Title line of a 3-line record, absent for bare 2-line records
    pub display_name: Option<String>,
    pub line1: String,
    pub line2: String,
}

impl RawElementSet {
    /// Catalog number from columns 3-7 of line 1
    pub fn catalog_number(&self) -> Option<u32> {
        self.line1.get(2..7)?.trim().parse().ok()
    }
}
