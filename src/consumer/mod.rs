// ============================================================================
// Consumer Module
// ============================================================================
//
// The background loop that pulls actions off the bus and hands them to the
// service's action handler, one at a time.
//
// ============================================================================

mod action_consumer;

pub use action_consumer::ActionConsumer;
