/// Execute an aggregate command deterministically (no IO, no async).
///
/// 1. **Decide**: calls `aggregate.handle(command)` to get events (pure, no mutation)
/// 2. **Evolve**: applies each event to the aggregate via `aggregate.apply(event)`
///
/// Mutates the aggregate in place. The infra `CommandDispatcher` is the
/// persistent counterpart of this function; this one is for tests and inline use.
pub fn execute<A>(
    aggregate: &mut A,
    command: &A::Command,
) -> Result<Vec<A::Event>, A::Error>
where
    A: taller_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
