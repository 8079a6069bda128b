use state_machines::state_machine;

state_machine! {
    name: SlotFillMachine,
    state: SlotFillState,
    initial: Collecting,
    states: [Collecting, Ready, Answered],
    events {
        complete_facts { transition: { from: Collecting, to: Ready } }
        answer { transition: { from: Ready, to: Answered } }
    }
}

pub fn collecting() -> SlotFillMachine<(), Collecting> {
    SlotFillMachine::new(())
}
