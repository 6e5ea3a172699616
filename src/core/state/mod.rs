pub mod update_state;

pub use update_state::UpdateState;
