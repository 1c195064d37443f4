pub mod execvnode;
pub mod reservation;

pub use reservation::{
    AlterRevert, AlterState, PendingClient, Reservation, ResvKind, ResvSnapshot, ResvState,
};
