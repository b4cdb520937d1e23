//! Writes: optimistic apply, network call, commit or rollback, invalidate.

mod auth;
mod coordinator;
pub mod optimistic;
mod todos;

pub use auth::{
    AuthMutations, LogoutMutation, SignInInput, SignInMutation, UpdateProfileMutation,
};
pub use coordinator::{
    Invalidation, Mutation, MutationContext, MutationCoordinator, MutationHandle, MutationState,
};
pub use todos::{
    ArchiveCompletedMutation, BulkDeleteTodosMutation, BulkUpdateInput, BulkUpdateTodosMutation,
    CreateTodoMutation, DeleteTodoMutation, TodoMutations, ToggleTodoMutation, UpdateTodoInput,
    UpdateTodoMutation,
};
