fn main() -> Result<(), Box<dyn std::error::Error>> {
    claude_code_usage_monitor_lib::run()
}
