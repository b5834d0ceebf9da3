use super::*;

#[test]
fn memory_navigator_reports_visited_path() {
    let nav = MemoryNavigator::new("/");
    nav.visit("/dashboard");
    assert_eq!(nav.current_path(), "/dashboard");
    assert!(nav.replaced().is_empty());
}

#[test]
fn replace_records_target_and_moves_path() {
    let nav = MemoryNavigator::new("/dashboard");
    let target = Url::parse("https://app.example.com/?redirectTo=%2Fdashboard").unwrap();
    nav.replace(&target);
    assert_eq!(nav.replaced(), vec![target]);
    assert_eq!(nav.current_path(), "/");
}
