//! Menu action types

/// Actions that can be performed from the menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    // Stepping
    Forward,
    Backward,
    // Running
    Play,
    PlayBackward,
    Pause,
    RunToBreakpoint,
    // Inspection
    ShowTree,
    ShowHistory,
    // Session
    Reset,
    Exit,
}

impl MenuAction {
    pub const ALL: [MenuAction; 10] = [
        MenuAction::Forward,
        MenuAction::Backward,
        MenuAction::Play,
        MenuAction::PlayBackward,
        MenuAction::Pause,
        MenuAction::RunToBreakpoint,
        MenuAction::ShowTree,
        MenuAction::ShowHistory,
        MenuAction::Reset,
        MenuAction::Exit,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MenuAction::Forward => "▶  Step forward",
            MenuAction::Backward => "◀  Step backward",
            MenuAction::Play => "⏩ Play",
            MenuAction::PlayBackward => "⏪ Play backward",
            MenuAction::Pause => "⏸  Pause",
            MenuAction::RunToBreakpoint => "🎯 Run to step",
            MenuAction::ShowTree => "🌳 Show levels",
            MenuAction::ShowHistory => "📜 Show history",
            MenuAction::Reset => "🔄 Reset",
            MenuAction::Exit => "🛑 Exit",
        }
    }

    pub fn labels() -> Vec<&'static str> {
        Self::ALL.iter().map(MenuAction::label).collect()
    }
}
