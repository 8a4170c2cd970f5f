//! Accessible state flags.
//!
//! The set itself is the AT-SPI [`StateSet`]; this module adds the spelled-out
//! names used by `attribute/{name}` and the serialized tree.

pub use atspi_common::{State, StateSet};

/// Every state in AT-SPI bit order with its human readable name.
const STATE_NAMES: [(State, &str); 44] = [
    (State::Invalid, "invalid"),
    (State::Active, "active"),
    (State::Armed, "armed"),
    (State::Busy, "busy"),
    (State::Checked, "checked"),
    (State::Collapsed, "collapsed"),
    (State::Defunct, "defunct"),
    (State::Editable, "editable"),
    (State::Enabled, "enabled"),
    (State::Expandable, "expandable"),
    (State::Expanded, "expanded"),
    (State::Focusable, "focusable"),
    (State::Focused, "focused"),
    (State::HasTooltip, "has tooltip"),
    (State::Horizontal, "horizontal"),
    (State::Iconified, "iconified"),
    (State::Modal, "modal"),
    (State::MultiLine, "multi line"),
    (State::Multiselectable, "multiselectable"),
    (State::Opaque, "opaque"),
    (State::Pressed, "pressed"),
    (State::Resizable, "resizable"),
    (State::Selectable, "selectable"),
    (State::Selected, "selected"),
    (State::Sensitive, "sensitive"),
    (State::Showing, "showing"),
    (State::SingleLine, "single line"),
    (State::Stale, "stale"),
    (State::Transient, "transient"),
    (State::Vertical, "vertical"),
    (State::Visible, "visible"),
    (State::ManagesDescendants, "manages descendants"),
    (State::Indeterminate, "indeterminate"),
    (State::Required, "required"),
    (State::Truncated, "truncated"),
    (State::Animated, "animated"),
    (State::InvalidEntry, "invalid entry"),
    (State::SupportsAutocompletion, "supports autocompletion"),
    (State::SelectableText, "selectable text"),
    (State::IsDefault, "is default"),
    (State::Visited, "visited"),
    (State::Checkable, "checkable"),
    (State::HasPopup, "has popup"),
    (State::ReadOnly, "read only"),
];

pub fn state_name(state: State) -> &'static str {
    STATE_NAMES
        .iter()
        .find(|(candidate, _)| *candidate == state)
        .map(|(_, name)| *name)
        .unwrap_or("invalid")
}

/// Looks a state up by name.
///
/// Names match with spaces, underscores or hyphens between words, so
/// `"multi line"`, `"multi_line"` and `"multi-line"` are equivalent.
pub fn state_by_name(name: &str) -> Option<State> {
    let wanted = name.trim().to_ascii_lowercase().replace(['_', '-'], " ");
    STATE_NAMES
        .iter()
        .find(|(_, candidate)| *candidate == wanted)
        .map(|(state, _)| *state)
}

/// Builds a set holding exactly `states`.
pub fn state_set(states: &[State]) -> StateSet {
    let mut set = StateSet::empty();
    for state in states {
        set.insert(*state);
    }
    set
}

/// Name-based queries over a [`StateSet`].
pub trait StateSetExt {
    /// Whether the named state is set, `None` for names that are not states.
    fn contains_named(&self, name: &str) -> Option<bool>;

    /// Names of all set states in bit order.
    fn names(&self) -> Vec<&'static str>;

    /// The names joined with `", "`.
    fn describe(&self) -> String {
        self.names().join(", ")
    }

    fn is_visible(&self) -> bool;

    fn is_sensitive(&self) -> bool;
}

impl StateSetExt for StateSet {
    fn contains_named(&self, name: &str) -> Option<bool> {
        state_by_name(name).map(|state| self.contains(state))
    }

    fn names(&self) -> Vec<&'static str> {
        STATE_NAMES
            .iter()
            .filter(|(state, _)| self.contains(*state))
            .map(|(_, name)| *name)
            .collect()
    }

    fn is_visible(&self) -> bool {
        self.contains(State::Visible)
    }

    fn is_sensitive(&self) -> bool {
        self.contains(State::Sensitive)
    }
}
