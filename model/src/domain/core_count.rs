//! CPU demand and capacity are counted in cores (fractional, like
//! Kubernetes millicores), expressed as a dimensionless ratio.

unit! {
    system: uom::si;
    quantity: uom::si::ratio;

    @core: prefix!(none); "core", "core", "cores";
    @millicore: prefix!(milli); "m", "millicore", "millicores";
}
