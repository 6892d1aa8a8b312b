use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Downloaded, Extracted, Captioned, Chunked, Embedded, Saved, Verified],
    events {
        download { transition: { from: Ready, to: Downloaded } }
        extract { transition: { from: Downloaded, to: Extracted } }
        caption { transition: { from: Extracted, to: Captioned } }
        chunk { transition: { from: Captioned, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        save { transition: { from: Embedded, to: Saved } }
        verify { transition: { from: Saved, to: Verified } }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
