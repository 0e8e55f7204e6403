fn main() {
    focuslamp_lib::run()
}
